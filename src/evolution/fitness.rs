//! Pure fitness scoring for candidate configurations.

use crate::metrics::AgentMetrics;

/// Inputs to the fitness function, one value per quality axis.
#[derive(Debug, Clone, Copy)]
pub struct FitnessInput {
    /// Average response time in milliseconds.
    pub response_time: f64,
    /// Fraction of failed calls, in [0, 1].
    pub error_rate: f64,
    /// Memory pressure, in [0, 1].
    pub memory_usage: f64,
    /// Fraction of completed tasks, in [0, 1].
    pub task_completion: f64,
}

impl From<&AgentMetrics> for FitnessInput {
    fn from(metrics: &AgentMetrics) -> Self {
        Self {
            response_time: metrics.avg_duration_ms,
            error_rate: metrics.error_rate,
            memory_usage: metrics.memory_pressure,
            task_completion: metrics.task_completion_rate,
        }
    }
}

/// Weighted scalar quality score in [0, 1].
///
/// `0.3*(1 - error_rate) + 0.3*task_completion + 0.2*speed + 0.2*(1 - memory)`
/// where `speed = min(1, 100 / response_time)`; the clamp keeps the score
/// inside [0, 1] for sub-100ms responses and a non-positive response time
/// counts as full speed.
pub fn fitness(input: &FitnessInput) -> f64 {
    let speed = if input.response_time > 0.0 {
        (100.0 / input.response_time).min(1.0)
    } else {
        1.0
    };
    0.3 * (1.0 - input.error_rate)
        + 0.3 * input.task_completion
        + 0.2 * speed
        + 0.2 * (1.0 - input.memory_usage)
}

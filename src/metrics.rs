//! Rolling window of LLM call outcomes feeding fitness evaluation.

use crate::config::ConfigStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

/// How many call records the collector retains. Oldest are dropped first.
pub const ROLLING_WINDOW: usize = 100;

/// Outcome of one LLM invocation, appended by the invocation hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub task_completed: bool,
    pub model: String,
}

/// Aggregate snapshot computed fresh from the retained window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub avg_duration_ms: f64,
    /// Fraction of calls that failed, in [0, 1].
    pub error_rate: f64,
    /// Fraction of calls whose task was judged complete, in [0, 1].
    pub task_completion_rate: f64,
    /// Physical memory pressure (used / total), in [0, 1].
    pub memory_pressure: f64,
}

impl AgentMetrics {
    /// Snapshot for an empty window: no errors, full completion.
    pub fn neutral() -> Self {
        Self {
            avg_duration_ms: 0.0,
            error_rate: 0.0,
            task_completion_rate: 1.0,
            memory_pressure: current_memory_pressure(),
        }
    }
}

/// Host health signal independent of any LLM activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Free physical memory / total, in [0, 1].
    pub free_memory_ratio: f64,
    /// 1-minute load average divided by logical core count.
    pub load_per_core: f64,
    /// Free disk space at the state directory / total, in [0, 1].
    pub free_disk_ratio: f64,
}

/// FIFO window of call outcomes with best-effort JSON persistence.
pub struct MetricsCollector {
    window: VecDeque<LlmCallRecord>,
    path: PathBuf,
}

impl MetricsCollector {
    pub fn new(store: &ConfigStore) -> Self {
        Self {
            window: VecDeque::with_capacity(ROLLING_WINDOW),
            path: store.metrics_path(),
        }
    }

    /// Append one outcome, evicting the oldest past the window cap.
    pub fn record(&mut self, entry: LlmCallRecord) {
        self.window.push_back(entry);
        while self.window.len() > ROLLING_WINDOW {
            self.window.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Compute a fresh snapshot from the retained window.
    pub fn compute(&self) -> AgentMetrics {
        if self.window.is_empty() {
            return AgentMetrics::neutral();
        }
        let n = self.window.len() as f64;
        let total_ms: u64 = self.window.iter().map(|r| r.duration_ms).sum();
        let failures = self.window.iter().filter(|r| !r.success).count() as f64;
        let completed = self.window.iter().filter(|r| r.task_completed).count() as f64;

        AgentMetrics {
            avg_duration_ms: total_ms as f64 / n,
            error_rate: failures / n,
            task_completion_rate: completed / n,
            memory_pressure: current_memory_pressure(),
        }
    }

    /// Persist the window to `metrics.json`. Best-effort: failures are
    /// logged and never surfaced to the caller.
    pub fn persist(&self) {
        let records: Vec<&LlmCallRecord> = self.window.iter().collect();
        let json = match serde_json::to_string_pretty(&records) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize metrics window: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, json) {
            tracing::warn!("Failed to persist metrics to {}: {e}", self.path.display());
            return;
        }
        crate::config::store::restrict_file(&self.path);
    }

    /// Reload the window from disk. Best-effort: a missing or corrupt
    /// file leaves the window empty.
    pub fn load(&mut self) {
        self.window.clear();
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return,
        };
        let records: Vec<LlmCallRecord> = match serde_json::from_str(&contents) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Ignoring corrupt metrics file {}: {e}", self.path.display());
                return;
            }
        };
        for record in records {
            self.record(record);
        }
    }
}

fn current_memory_pressure() -> f64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    sys.used_memory() as f64 / total as f64
}

/// Capture host free-memory, CPU load, and free-disk ratios.
///
/// Pure observation; no state is touched beyond reading the filesystem
/// topology to find the disk backing `state_dir`.
pub fn capture_system_snapshot(state_dir: &Path) -> SystemSnapshot {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let total_mem = sys.total_memory();
    let free_memory_ratio = if total_mem == 0 {
        0.0
    } else {
        sys.available_memory() as f64 / total_mem as f64
    };

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let load_per_core = sysinfo::System::load_average().one / cores as f64;

    // Longest mount-point prefix match wins (e.g. "/home" over "/").
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let free_disk_ratio = disks
        .list()
        .iter()
        .filter(|d| state_dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| {
            let total = d.total_space();
            if total == 0 {
                0.0
            } else {
                d.available_space() as f64 / total as f64
            }
        })
        .unwrap_or(0.0);

    SystemSnapshot {
        free_memory_ratio,
        load_per_core,
        free_disk_ratio,
    }
}

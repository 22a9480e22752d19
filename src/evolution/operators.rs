//! Mutation, crossover, and seeding operators over configuration
//! documents.
//!
//! Every operator takes the document by mutable reference and leaves it
//! structurally valid; operators that need a non-empty list no-op when
//! the list is empty rather than failing the whole offspring.

use crate::config::schema::{PRUNING_MODES, THINKING_LEVELS, VERBOSE_LEVELS};
use crate::config::AgentConfig;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The mutation catalog. Kind names are stable identifiers recorded on
/// each individual's lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    ProviderPriority,
    ModelAlias,
    Streaming,
    ContextPruning,
    MemoryWeight,
    ThinkingDefault,
    VerboseDefault,
}

impl MutationKind {
    pub const ALL: [MutationKind; 7] = [
        MutationKind::ProviderPriority,
        MutationKind::ModelAlias,
        MutationKind::Streaming,
        MutationKind::ContextPruning,
        MutationKind::MemoryWeight,
        MutationKind::ThinkingDefault,
        MutationKind::VerboseDefault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::ProviderPriority => "provider_priority",
            MutationKind::ModelAlias => "model_alias",
            MutationKind::Streaming => "streaming",
            MutationKind::ContextPruning => "context_pruning",
            MutationKind::MemoryWeight => "memory_weight",
            MutationKind::ThinkingDefault => "thinking_default",
            MutationKind::VerboseDefault => "verbose_default",
        }
    }
}

/// Apply one mutation in place. Returns whether the document changed.
pub fn apply_mutation<R: Rng>(kind: MutationKind, config: &mut AgentConfig, rng: &mut R) -> bool {
    match kind {
        MutationKind::ProviderPriority => {
            let Some(fallbacks) = config.model.fallbacks.as_mut() else {
                return false;
            };
            if fallbacks.len() < 2 {
                return false;
            }
            let i = rng.gen_range(0..fallbacks.len());
            let j = rng.gen_range(0..fallbacks.len());
            fallbacks.swap(i, j);
            true
        }
        MutationKind::ModelAlias => {
            if config.models.is_empty() {
                return false;
            }
            let idx = rng.gen_range(0..config.models.len());
            let suffix: u32 = rng.gen_range(0..10_000);
            config.models[idx].alias = Some(format!("alias-{suffix:04}"));
            true
        }
        MutationKind::Streaming => {
            if config.models.is_empty() {
                return false;
            }
            let idx = rng.gen_range(0..config.models.len());
            config.models[idx].streaming = !config.models[idx].streaming;
            true
        }
        MutationKind::ContextPruning => {
            let current = config.pruning.mode.as_deref().unwrap_or(PRUNING_MODES[0]);
            let next = if current == PRUNING_MODES[0] {
                PRUNING_MODES[1]
            } else {
                PRUNING_MODES[0]
            };
            config.pruning.mode = Some(next.to_string());
            config.pruning.soft_trim_ratio = Some(rng.gen_range(0.5..=0.8));
            true
        }
        MutationKind::MemoryWeight => {
            let current = config.memory.vector_weight.unwrap_or(0.5);
            let delta = if rng.gen_bool(0.5) { 0.1 } else { -0.1 };
            config.memory.vector_weight = Some((current + delta).clamp(0.0, 1.0));
            true
        }
        MutationKind::ThinkingDefault => {
            let level = THINKING_LEVELS.choose(rng).copied().unwrap_or("medium");
            config.defaults.thinking = Some(level.to_string());
            true
        }
        MutationKind::VerboseDefault => {
            let level = VERBOSE_LEVELS.choose(rng).copied().unwrap_or("low");
            config.defaults.verbose = Some(level.to_string());
            true
        }
    }
}

/// Draw `count` distinct mutation kinds from the catalog.
pub fn draw_kinds<R: Rng>(count: usize, rng: &mut R) -> Vec<MutationKind> {
    let mut kinds = MutationKind::ALL.to_vec();
    kinds.shuffle(rng);
    kinds.truncate(count.min(kinds.len()));
    kinds
}

/// Combine two parent documents into one child.
///
/// The child starts as a deep copy of `a`; fallback lists are
/// union-merged with first-seen order and no duplicates; when both
/// parents carry a vector-search weight the child gets their mean.
pub fn crossover(a: &AgentConfig, b: &AgentConfig) -> AgentConfig {
    let mut child = a.clone();

    let merged = merge_fallbacks(a.fallbacks(), b.fallbacks());
    if !merged.is_empty() {
        child.model.fallbacks = Some(merged);
    }

    if let (Some(wa), Some(wb)) = (a.memory.vector_weight, b.memory.vector_weight) {
        child.memory.vector_weight = Some((wa + wb) / 2.0);
    }

    child
}

fn merge_fallbacks(a: &[String], b: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(a.len() + b.len());
    for id in a.iter().chain(b.iter()) {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged
}

/// Cheap seed perturbation for initial diversity, cycling by index.
pub fn seed_variant<R: Rng>(index: usize, config: &mut AgentConfig, rng: &mut R) {
    match index % 3 {
        0 => {
            if let Some(fallbacks) = config.model.fallbacks.as_mut() {
                fallbacks.shuffle(rng);
            }
        }
        1 => {
            apply_mutation(MutationKind::Streaming, config, rng);
        }
        _ => {
            apply_mutation(MutationKind::ThinkingDefault, config, rng);
        }
    }
}

//! Typed view of the agent's runtime configuration document.
//!
//! The document is deliberately open: every struct carries a flattened
//! `extra` map so settings the repair/evolution engines don't know about
//! survive a load/save round trip instead of being silently dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fallback models written by repair when none are configured.
pub const DEFAULT_FALLBACKS: [&str; 2] = ["openrouter/auto", "ollama/llama3.2"];

/// Context-pruning modes the engines know how to toggle between.
pub const PRUNING_MODES: [&str; 2] = ["cache-aware", "aggressive"];

/// Pruning mode written by repair when none is set.
pub const DEFAULT_PRUNING_MODE: &str = "cache-aware";

/// Ordinal thinking levels, weakest to strongest.
pub const THINKING_LEVELS: [&str; 6] = ["off", "minimal", "low", "medium", "high", "xhigh"];

/// Verbosity levels for the agent's default output style.
pub const VERBOSE_LEVELS: [&str; 3] = ["off", "low", "high"];

/// The agent's runtime configuration document.
///
/// Treated as a deep-copyable value everywhere: engines clone it before
/// mutating so no two engines ever alias the same in-memory document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub model: ModelSettings,

    /// Per-model entries (alias + streaming flag).
    #[serde(default)]
    pub models: Vec<ModelEntry>,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub pruning: PruningSettings,

    #[serde(default)]
    pub defaults: RuntimeDefaults,

    /// Settings outside the known paths, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Primary provider/model selection and the fallback chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub provider: Option<String>,
    /// Primary model id, e.g. `openrouter/auto`.
    #[serde(default)]
    pub primary: Option<String>,
    /// Ordered fallback model ids tried when the primary fails.
    #[serde(default)]
    pub fallbacks: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One known model and its per-model flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Memory-search block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Weight of vector search vs. keyword search, in [0, 1].
    #[serde(default)]
    pub vector_weight: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Context-pruning block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruningSettings {
    #[serde(default)]
    pub mode: Option<String>,
    /// Fraction of the context kept on a soft trim, in [0.5, 0.8].
    #[serde(default)]
    pub soft_trim_ratio: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Session-level defaults the optimizer is allowed to resample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeDefaults {
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub verbose: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentConfig {
    /// The fallback list, empty slice when unset.
    pub fn fallbacks(&self) -> &[String] {
        self.model.fallbacks.as_deref().unwrap_or(&[])
    }

    /// Whether memory search is explicitly enabled.
    pub fn memory_enabled(&self) -> bool {
        self.memory.enabled == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_known_paths_set() {
        let config = AgentConfig::default();
        assert!(config.model.primary.is_none());
        assert!(config.model.fallbacks.is_none());
        assert!(config.memory.enabled.is_none());
        assert!(config.pruning.mode.is_none());
        assert!(config.fallbacks().is_empty());
        assert!(!config.memory_enabled());
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = serde_json::json!({
            "model": { "primary": "openrouter/auto", "timeout_ms": 30000 },
            "memory": { "enabled": true },
            "gateway": { "port": 18789 }
        });
        let config: AgentConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.model.primary.as_deref(), Some("openrouter/auto"));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["gateway"]["port"], 18789);
        assert_eq!(back["model"]["timeout_ms"], 30000);
    }

    #[test]
    fn test_deep_copy_does_not_alias() {
        let mut config = AgentConfig::default();
        config.model.fallbacks = Some(vec!["a".into(), "b".into()]);

        let mut copy = config.clone();
        copy.model.fallbacks.as_mut().unwrap().push("c".into());

        assert_eq!(config.fallbacks().len(), 2);
        assert_eq!(copy.fallbacks().len(), 3);
    }
}

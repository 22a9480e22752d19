//! Rule-based health checks and deterministic, idempotent repairs over
//! the configuration document.

use crate::config::schema::{DEFAULT_FALLBACKS, DEFAULT_PRUNING_MODE};
use crate::config::{AgentConfig, ConfigStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one health check. Pure function of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Immutable audit record for one applied fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAction {
    pub kind: String,
    pub description: String,
    /// Prior value, `Null` when the setting was unset.
    pub before: Value,
    pub after: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResult {
    pub success: bool,
    pub repairs: Vec<RepairAction>,
    pub errors: Vec<String>,
}

/// Health-check and repair engine over one loaded configuration snapshot.
///
/// `load_config` must run before any check or repair. Repairs are guarded
/// by "only if missing/disabled", so a second `repair` on an unchanged
/// document applies nothing.
pub struct SelfRepairEngine {
    store: ConfigStore,
    config: Option<AgentConfig>,
    history: Vec<RepairAction>,
}

impl SelfRepairEngine {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            config: None,
            history: Vec::new(),
        }
    }

    /// Fetch a fresh configuration snapshot from the store.
    pub fn load_config(&mut self) -> anyhow::Result<()> {
        self.config = Some(self.store.load_snapshot()?);
        Ok(())
    }

    pub fn config(&self) -> Option<&AgentConfig> {
        self.config.as_ref()
    }

    /// All repair actions applied over this engine's lifetime.
    pub fn history(&self) -> &[RepairAction] {
        &self.history
    }

    /// Run the fixed check battery against the loaded document.
    pub fn run_health_checks(&self) -> anyhow::Result<Vec<HealthCheck>> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("configuration not loaded; call load_config first"))?;

        Ok(vec![
            check_model_configuration(config),
            check_provider_availability(config),
            check_memory_settings(config),
        ])
    }

    /// Apply the three guarded fixes in sequence.
    ///
    /// Expected conditions never error; anything unexpected lands in
    /// `errors` with `success = false` instead of panicking the caller.
    pub fn repair(&mut self) -> RepairResult {
        let Some(config) = self.config.as_mut() else {
            return RepairResult {
                success: false,
                repairs: Vec::new(),
                errors: vec!["configuration not loaded; call load_config first".to_string()],
            };
        };

        let mut repairs = Vec::new();

        // Fix 1: missing fallback chain.
        if config.fallbacks().is_empty() {
            let before = json_or_null(&config.model.fallbacks);
            let fallbacks: Vec<String> = DEFAULT_FALLBACKS.iter().map(|s| s.to_string()).collect();
            config.model.fallbacks = Some(fallbacks.clone());
            repairs.push(action(
                "fallback_models",
                "Set default fallback models",
                before,
                serde_json::json!(fallbacks),
            ));
        }

        // Fix 2: memory search disabled or unset.
        if !config.memory_enabled() {
            let before = json_or_null(&config.memory.enabled);
            config.memory.enabled = Some(true);
            repairs.push(action(
                "memory_search",
                "Enabled memory search",
                before,
                Value::Bool(true),
            ));
        }

        // Fix 3: no context-pruning mode.
        if config.pruning.mode.is_none() {
            config.pruning.mode = Some(DEFAULT_PRUNING_MODE.to_string());
            repairs.push(action(
                "context_pruning",
                "Set default context-pruning mode",
                Value::Null,
                Value::String(DEFAULT_PRUNING_MODE.to_string()),
            ));
        }

        self.history.extend(repairs.iter().cloned());
        RepairResult {
            success: true,
            repairs,
            errors: Vec::new(),
        }
    }

    /// Persist the (possibly repaired) document through the store.
    pub fn save_repaired_config(&self) -> anyhow::Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("configuration not loaded; nothing to save"))?;
        self.store.write_config(config)
    }
}

fn check_model_configuration(config: &AgentConfig) -> HealthCheck {
    if config.model.primary.is_none() {
        return HealthCheck {
            name: "model_configuration".into(),
            status: HealthStatus::Critical,
            message: "No primary model configured".into(),
            suggestion: Some("Set model.primary to a provider/model id".into()),
        };
    }
    if config.fallbacks().is_empty() {
        return HealthCheck {
            name: "model_configuration".into(),
            status: HealthStatus::Warning,
            message: "Primary model set but no fallback list".into(),
            suggestion: Some("Run repair to install default fallbacks".into()),
        };
    }
    HealthCheck {
        name: "model_configuration".into(),
        status: HealthStatus::Healthy,
        message: format!(
            "Primary model {} with {} fallback(s)",
            config.model.primary.as_deref().unwrap_or_default(),
            config.fallbacks().len()
        ),
        suggestion: None,
    }
}

fn check_provider_availability(config: &AgentConfig) -> HealthCheck {
    let count = config.fallbacks().len();
    if count == 0 {
        HealthCheck {
            name: "provider_availability".into(),
            status: HealthStatus::Warning,
            message: "No fallback providers available".into(),
            suggestion: Some("Run repair to install default fallbacks".into()),
        }
    } else {
        HealthCheck {
            name: "provider_availability".into(),
            status: HealthStatus::Healthy,
            message: format!("{count} fallback provider(s) configured"),
            suggestion: None,
        }
    }
}

fn check_memory_settings(config: &AgentConfig) -> HealthCheck {
    if config.memory_enabled() {
        HealthCheck {
            name: "memory_settings".into(),
            status: HealthStatus::Healthy,
            message: "Memory search enabled".into(),
            suggestion: None,
        }
    } else {
        HealthCheck {
            name: "memory_settings".into(),
            status: HealthStatus::Warning,
            message: "Memory search absent or disabled".into(),
            suggestion: Some("Run repair to enable memory search".into()),
        }
    }
}

fn action(kind: &str, description: &str, before: Value, after: Value) -> RepairAction {
    RepairAction {
        kind: kind.to_string(),
        description: description.to_string(),
        before,
        after,
        timestamp: Utc::now(),
    }
}

fn json_or_null<T: Serialize>(value: &Option<T>) -> Value {
    value
        .as_ref()
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_with(config: AgentConfig) -> (TempDir, SelfRepairEngine) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        store.write_config(&config).unwrap();
        let mut engine = SelfRepairEngine::new(store);
        engine.load_config().unwrap();
        (dir, engine)
    }

    fn healthy_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.model.primary = Some("openrouter/auto".into());
        config.model.fallbacks = Some(vec!["ollama/llama3.2".into()]);
        config.memory.enabled = Some(true);
        config.pruning.mode = Some("cache-aware".into());
        config
    }

    #[test]
    fn test_checks_require_loaded_config() {
        let dir = TempDir::new().unwrap();
        let engine = SelfRepairEngine::new(ConfigStore::at(dir.path()).unwrap());
        assert!(engine.run_health_checks().is_err());
    }

    #[test]
    fn test_missing_primary_is_critical() {
        let (_dir, engine) = engine_with(AgentConfig::default());
        let checks = engine.run_health_checks().unwrap();
        let model = checks.iter().find(|c| c.name == "model_configuration").unwrap();
        assert_eq!(model.status, HealthStatus::Critical);
    }

    #[test]
    fn test_primary_without_fallbacks_is_warning() {
        let mut config = AgentConfig::default();
        config.model.primary = Some("openrouter/auto".into());
        let (_dir, engine) = engine_with(config);
        let checks = engine.run_health_checks().unwrap();
        let model = checks.iter().find(|c| c.name == "model_configuration").unwrap();
        assert_eq!(model.status, HealthStatus::Warning);
    }

    #[test]
    fn test_healthy_config_passes_all_checks() {
        let (_dir, engine) = engine_with(healthy_config());
        let checks = engine.run_health_checks().unwrap();
        assert!(checks.iter().all(|c| c.status == HealthStatus::Healthy));
    }

    #[test]
    fn test_repair_fixes_all_three_defaults() {
        let (_dir, mut engine) = engine_with(AgentConfig::default());
        let result = engine.repair();
        assert!(result.success);
        assert_eq!(result.repairs.len(), 3);
        assert_eq!(result.repairs[0].before, serde_json::Value::Null);

        let config = engine.config().unwrap();
        assert_eq!(config.fallbacks().len(), 2);
        assert!(config.memory_enabled());
        assert_eq!(config.pruning.mode.as_deref(), Some("cache-aware"));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let (_dir, mut engine) = engine_with(AgentConfig::default());
        assert_eq!(engine.repair().repairs.len(), 3);
        assert_eq!(engine.repair().repairs.len(), 0);
    }

    #[test]
    fn test_repair_noop_on_healthy_config() {
        let (_dir, mut engine) = engine_with(healthy_config());
        let result = engine.repair();
        assert!(result.success);
        assert!(result.repairs.is_empty());
    }

    #[test]
    fn test_repair_records_before_value() {
        let mut config = AgentConfig::default();
        config.memory.enabled = Some(false);
        let (_dir, mut engine) = engine_with(config);
        let result = engine.repair();
        let memory = result.repairs.iter().find(|r| r.kind == "memory_search").unwrap();
        assert_eq!(memory.before, serde_json::Value::Bool(false));
        assert_eq!(memory.after, serde_json::Value::Bool(true));
    }

    #[test]
    fn test_history_accumulates_across_calls() {
        let (_dir, mut engine) = engine_with(AgentConfig::default());
        engine.repair();
        engine.repair();
        assert_eq!(engine.history().len(), 3);
    }

    #[test]
    fn test_save_repaired_config_persists() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let mut engine = SelfRepairEngine::new(store.clone());
        engine.load_config().unwrap();
        engine.repair();
        engine.save_repaired_config().unwrap();

        let reloaded = store.load_snapshot().unwrap();
        assert!(reloaded.memory_enabled());
    }
}

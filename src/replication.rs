//! Manifest-backed clone lifecycle: spawn, score, prune, promote.
//!
//! The manifest is reloaded from disk before every mutating operation to
//! shrink staleness windows, and saved after. A pruned clone's record is
//! removed from the manifest with the directory deletion so the manifest
//! never points at a deleted workspace.

use crate::config::store::{restrict_dir, restrict_file};
use crate::config::{AgentConfig, ConfigStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Hard cap on live clones. Holds after every spawn/prune.
pub const MAX_CLONES: usize = 5;

/// One replicated configuration workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRecord {
    pub id: String,
    pub dir: PathBuf,
    pub fitness: f64,
    pub generation: u32,
    pub created_at: DateTime<Utc>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationManifest {
    pub clones: Vec<CloneRecord>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Clone lifecycle engine over the persisted manifest.
pub struct SelfReplicationEngine {
    store: ConfigStore,
    manifest: ReplicationManifest,
}

impl SelfReplicationEngine {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            manifest: ReplicationManifest::default(),
        }
    }

    /// Reload the manifest from disk. A missing or corrupt file yields
    /// an empty manifest rather than an error.
    pub fn load_manifest(&mut self) {
        let path = self.store.manifest_path();
        self.manifest = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt manifest {}: {e}", path.display());
                ReplicationManifest::default()
            }),
            Err(_) => ReplicationManifest::default(),
        };
    }

    pub fn save_manifest(&mut self) -> Result<()> {
        self.manifest.last_updated_at = Some(Utc::now());
        self.store
            .write_json(&self.store.manifest_path(), &self.manifest)
    }

    /// Spawn a clone workspace for `config`. Returns `None` when the
    /// clone cap is already reached.
    pub fn spawn_clone(
        &mut self,
        config: &AgentConfig,
        generation: u32,
        fitness: f64,
    ) -> Result<Option<CloneRecord>> {
        self.load_manifest();
        if self.manifest.clones.len() >= MAX_CLONES {
            tracing::debug!(cap = MAX_CLONES, "Clone cap reached, refusing spawn");
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.store.clones_dir().join(&id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create clone directory: {}", dir.display()))?;
        restrict_dir(&dir);

        self.store.write_json(&dir.join("config.json"), config)?;

        // Inherit the primary model-settings snapshot when one exists.
        let models = self.store.models_path();
        if models.exists() {
            let dest = dir.join("models.json");
            if let Err(e) = fs::copy(&models, &dest) {
                tracing::warn!("Could not copy model settings into clone {id}: {e}");
            } else {
                restrict_file(&dest);
            }
        }

        let record = CloneRecord {
            id,
            dir,
            fitness,
            generation,
            created_at: Utc::now(),
            last_evaluated_at: None,
        };
        self.manifest.clones.push(record.clone());
        self.save_manifest()?;
        tracing::info!(id = %record.id, fitness, "Spawned clone");
        Ok(Some(record))
    }

    /// Record a fresh fitness for a clone. Unknown ids are a no-op.
    pub fn update_fitness(&mut self, id: &str, fitness: f64) -> Result<()> {
        self.load_manifest();
        let Some(record) = self.manifest.clones.iter_mut().find(|c| c.id == id) else {
            return Ok(());
        };
        record.fitness = fitness;
        record.last_evaluated_at = Some(Utc::now());
        self.save_manifest()
    }

    /// Keep the `keep` fittest clones, delete the rest. Directory removal
    /// is best-effort and never blocks the manifest update. Returns the
    /// number of clones removed.
    pub fn prune_weak_clones(&mut self, keep: usize) -> Result<usize> {
        self.load_manifest();
        if self.manifest.clones.len() <= keep {
            return Ok(0);
        }

        let mut ranked = std::mem::take(&mut self.manifest.clones);
        ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        let losers = ranked.split_off(keep);

        for clone in &losers {
            if let Err(e) = fs::remove_dir_all(&clone.dir) {
                tracing::warn!(id = %clone.id, "Could not remove clone directory: {e}");
            }
        }

        let removed = losers.len();
        self.manifest.clones = ranked;
        self.save_manifest()?;
        tracing::info!(removed, kept = keep, "Pruned weak clones");
        Ok(removed)
    }

    /// Overwrite the primary model-settings file with the best clone's
    /// configuration snapshot. The only path by which a clone becomes
    /// the primary.
    pub fn promote_best_clone(&mut self) -> Result<CloneRecord> {
        self.load_manifest();
        let best = self
            .manifest
            .clones
            .iter()
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no clones to promote"))?;

        let snapshot_path = best.dir.join("config.json");
        let contents = fs::read_to_string(&snapshot_path).with_context(|| {
            format!("Failed to read clone snapshot: {}", snapshot_path.display())
        })?;
        let config: AgentConfig = serde_json::from_str(&contents).with_context(|| {
            format!("Failed to parse clone snapshot: {}", snapshot_path.display())
        })?;

        self.store.write_models(&config)?;
        tracing::info!(id = %best.id, fitness = best.fitness, "Promoted best clone");
        Ok(best)
    }

    /// Highest-fitness clone in the in-memory manifest view.
    pub fn best_clone(&self) -> Option<&CloneRecord> {
        self.manifest
            .clones
            .iter()
            .max_by(|a, b| a.fitness.total_cmp(&b.fitness))
    }

    /// In-memory manifest view; may lag disk until the next reload.
    pub fn clones(&self) -> &[CloneRecord] {
        &self.manifest.clones
    }

    pub fn max_clones(&self) -> usize {
        MAX_CLONES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (TempDir, SelfReplicationEngine) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        (dir, SelfReplicationEngine::new(store))
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.model.primary = Some("openrouter/auto".into());
        config
    }

    #[test]
    fn test_spawn_creates_workspace_and_record() {
        let (_dir, mut engine) = engine();
        let record = engine.spawn_clone(&config(), 3, 0.8).unwrap().unwrap();
        assert!(record.dir.join("config.json").exists());
        assert_eq!(record.generation, 3);
        assert_eq!(engine.clones().len(), 1);
    }

    #[test]
    fn test_spawn_refuses_past_cap() {
        let (_dir, mut engine) = engine();
        for i in 0..MAX_CLONES {
            let spawned = engine.spawn_clone(&config(), 0, i as f64 / 10.0).unwrap();
            assert!(spawned.is_some());
            assert!(engine.clones().len() <= MAX_CLONES);
        }
        assert!(engine.spawn_clone(&config(), 0, 0.9).unwrap().is_none());
        assert_eq!(engine.clones().len(), MAX_CLONES);
    }

    #[test]
    fn test_spawn_inherits_model_settings() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        store.write_models(&config()).unwrap();

        let mut engine = SelfReplicationEngine::new(store);
        let record = engine.spawn_clone(&config(), 0, 0.5).unwrap().unwrap();
        assert!(record.dir.join("models.json").exists());
    }

    #[test]
    fn test_update_fitness_stamps_evaluation() {
        let (_dir, mut engine) = engine();
        let record = engine.spawn_clone(&config(), 0, 0.5).unwrap().unwrap();
        engine.update_fitness(&record.id, 0.9).unwrap();

        engine.load_manifest();
        let updated = engine.clones().iter().find(|c| c.id == record.id).unwrap();
        assert_eq!(updated.fitness, 0.9);
        assert!(updated.last_evaluated_at.is_some());
    }

    #[test]
    fn test_update_fitness_unknown_id_is_noop() {
        let (_dir, mut engine) = engine();
        engine.spawn_clone(&config(), 0, 0.5).unwrap();
        engine.update_fitness("no-such-id", 0.9).unwrap();
        engine.load_manifest();
        assert_eq!(engine.clones()[0].fitness, 0.5);
    }

    #[test]
    fn test_prune_keeps_fittest() {
        let (_dir, mut engine) = engine();
        for fitness in [0.9, 0.2, 0.5, 0.1, 0.7] {
            engine.spawn_clone(&config(), 0, fitness).unwrap();
        }

        let removed = engine.prune_weak_clones(3).unwrap();
        assert_eq!(removed, 2);

        let mut kept: Vec<f64> = engine.clones().iter().map(|c| c.fitness).collect();
        kept.sort_by(f64::total_cmp);
        assert_eq!(kept, vec![0.5, 0.7, 0.9]);
    }

    #[test]
    fn test_prune_removes_directories() {
        let (_dir, mut engine) = engine();
        let weak = engine.spawn_clone(&config(), 0, 0.1).unwrap().unwrap();
        let strong = engine.spawn_clone(&config(), 0, 0.9).unwrap().unwrap();

        engine.prune_weak_clones(1).unwrap();
        assert!(!weak.dir.exists());
        assert!(strong.dir.exists());
    }

    #[test]
    fn test_prune_noop_at_or_below_keep() {
        let (_dir, mut engine) = engine();
        engine.spawn_clone(&config(), 0, 0.5).unwrap();
        assert_eq!(engine.prune_weak_clones(3).unwrap(), 0);
        assert_eq!(engine.clones().len(), 1);
    }

    #[test]
    fn test_promote_best_overwrites_models() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let mut engine = SelfReplicationEngine::new(store.clone());

        let mut strong_config = config();
        strong_config.model.primary = Some("ollama/llama3.2".into());
        engine.spawn_clone(&config(), 0, 0.3).unwrap();
        engine.spawn_clone(&strong_config, 1, 0.9).unwrap();

        let promoted = engine.promote_best_clone().unwrap();
        assert_eq!(promoted.fitness, 0.9);

        let models: AgentConfig =
            serde_json::from_str(&fs::read_to_string(store.models_path()).unwrap()).unwrap();
        assert_eq!(models.model.primary.as_deref(), Some("ollama/llama3.2"));
    }

    #[test]
    fn test_promote_with_no_clones_errors() {
        let (_dir, mut engine) = engine();
        assert!(engine.promote_best_clone().is_err());
    }

    #[test]
    fn test_manifest_survives_reload() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path()).unwrap();
        let mut engine = SelfReplicationEngine::new(store.clone());
        engine.spawn_clone(&config(), 2, 0.6).unwrap();

        let mut fresh = SelfReplicationEngine::new(store);
        fresh.load_manifest();
        assert_eq!(fresh.clones().len(), 1);
        assert_eq!(fresh.clones()[0].generation, 2);
    }
}

//! Daemon lifecycle: process lock, status snapshot, and the three
//! maintenance cycles on independent timers.
//!
//! Cycle bodies share one engine state behind a mutex, so two cycles
//! never mutate the configuration document concurrently; a tick that
//! lands while another cycle is in flight queues behind it. Any error
//! inside a cycle body is logged and swallowed -- a broken pass must
//! never stop the timers or take down the host process.

pub mod control;
pub mod lock;

use crate::config::ConfigStore;
use crate::daemon::lock::{LockError, PidLock};
use crate::evolution::{EvolutionParams, EvolutionaryEngine};
use crate::metrics::MetricsCollector;
use crate::repair::SelfRepairEngine;
use crate::replication::{SelfReplicationEngine, MAX_CLONES};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// New best configurations above this fitness are auto-persisted.
pub const EVOLVE_SAVE_THRESHOLD: f64 = 0.8;

/// Replication is reserved for genuinely good configurations.
pub const REPLICATION_MIN_FITNESS: f64 = 0.7;

/// Full daemon state snapshot, overwritten on every cycle tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_repair_at: Option<DateTime<Utc>>,
    pub last_evolve_at: Option<DateTime<Utc>>,
    pub last_replication_at: Option<DateTime<Utc>>,
    pub repair_count: u64,
    pub evolve_count: u64,
    pub replication_count: u64,
    pub current_generation: u32,
    pub best_fitness: Option<f64>,
    pub clone_count: usize,
}

#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    pub repair: Duration,
    pub evolve: Duration,
    pub replicate: Duration,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            repair: Duration::from_secs(5 * 60),
            evolve: Duration::from_secs(60 * 60),
            replicate: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Engine state shared by the three cycle tasks.
struct Inner {
    store: ConfigStore,
    repair: SelfRepairEngine,
    evolution: EvolutionaryEngine,
    replication: SelfReplicationEngine,
    metrics: MetricsCollector,
    status: DaemonStatus,
}

impl Inner {
    /// Best-effort status persistence; failures are logged, never fatal.
    fn save_status(&self) {
        if let Err(e) = self.store.write_json(&self.store.status_path(), &self.status) {
            tracing::warn!("Failed to persist daemon status: {e:#}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CycleKind {
    Repair,
    Evolve,
    Replicate,
}

/// The daemon: owns the process lock, the engines, and the timers.
pub struct EvoDaemon {
    store: ConfigStore,
    intervals: DaemonIntervals,
    lock: PidLock,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    inner: Option<Arc<Mutex<Inner>>>,
}

impl EvoDaemon {
    pub fn new(store: ConfigStore, intervals: DaemonIntervals) -> Self {
        let lock = PidLock::new(store.lock_path());
        Self {
            store,
            intervals,
            lock,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            inner: None,
        }
    }

    /// Acquire the lock, build the engines, run one immediate repair
    /// pass, and arm the three cycle timers.
    ///
    /// Returns `Ok(false)` when another live process holds the lock.
    pub async fn start(&mut self) -> Result<bool> {
        match self.lock.acquire() {
            Ok(()) => {}
            Err(LockError::AlreadyRunning { pid }) => {
                tracing::info!(pid, "Daemon already running");
                return Ok(false);
            }
            Err(LockError::Io(e)) => return Err(e.into()),
        }

        // Engines are built lazily, against a freshly loaded snapshot.
        let snapshot = self.store.load_snapshot()?;
        let mut evolution = EvolutionaryEngine::new(EvolutionParams::default());
        evolution.initialize(&snapshot);
        let mut metrics = MetricsCollector::new(&self.store);
        metrics.load();
        let mut replication = SelfReplicationEngine::new(self.store.clone());
        replication.load_manifest();

        let status = DaemonStatus {
            running: true,
            pid: Some(std::process::id()),
            started_at: Some(Utc::now()),
            clone_count: replication.clones().len(),
            ..Default::default()
        };

        let inner = Arc::new(Mutex::new(Inner {
            store: self.store.clone(),
            repair: SelfRepairEngine::new(self.store.clone()),
            evolution,
            replication,
            metrics,
            status,
        }));
        inner.lock().await.save_status();

        // One repair pass right away instead of waiting a full interval.
        run_cycle(&inner, CycleKind::Repair).await;

        self.cancel = CancellationToken::new();
        for (kind, period) in [
            (CycleKind::Repair, self.intervals.repair),
            (CycleKind::Evolve, self.intervals.evolve),
            (CycleKind::Replicate, self.intervals.replicate),
        ] {
            self.tasks
                .push(spawn_cycle(inner.clone(), self.cancel.clone(), period, kind));
        }

        self.inner = Some(inner);
        tracing::info!(pid = std::process::id(), "Daemon started");
        Ok(true)
    }

    /// Disarm the timers, persist a final not-running status, and
    /// release the lock. Only cancels future ticks; an in-flight cycle
    /// body drains naturally before its task exits.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        if let Some(inner) = self.inner.take() {
            let mut guard = inner.lock().await;
            guard.status.running = false;
            guard.save_status();
            guard.metrics.persist();
        }

        self.lock.release();
        tracing::info!("Daemon stopped");
        Ok(())
    }

    /// Current in-memory status, when the daemon is running.
    pub async fn status(&self) -> Option<DaemonStatus> {
        match &self.inner {
            Some(inner) => Some(inner.lock().await.status.clone()),
            None => None,
        }
    }

    /// Read the persisted status snapshot from disk.
    pub fn read_status(store: &ConfigStore) -> Option<DaemonStatus> {
        let contents = fs::read_to_string(store.status_path()).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

fn spawn_cycle(
    inner: Arc<Mutex<Inner>>,
    cancel: CancellationToken,
    period: Duration,
    kind: CycleKind,
) -> JoinHandle<()> {
    // tokio panics on a zero-period interval, which would kill the cycle
    // task without any visible error.
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; the immediate repair
        // pass already ran, so consume it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => run_cycle(&inner, kind).await,
            }
        }
    })
}

/// Failure containment boundary: cycle errors are logged, never raised.
async fn run_cycle(inner: &Arc<Mutex<Inner>>, kind: CycleKind) {
    let result = match kind {
        CycleKind::Repair => repair_cycle(inner).await,
        CycleKind::Evolve => evolve_cycle(inner).await,
        CycleKind::Replicate => replicate_cycle(inner).await,
    };
    if let Err(e) = result {
        tracing::warn!("{kind:?} cycle failed: {e:#}");
    }
}

async fn repair_cycle(inner: &Arc<Mutex<Inner>>) -> Result<()> {
    let mut guard = inner.lock().await;
    let inner = &mut *guard;

    inner.repair.load_config()?;
    let result = inner.repair.repair();
    if !result.errors.is_empty() {
        anyhow::bail!("repair reported errors: {}", result.errors.join("; "));
    }
    if !result.repairs.is_empty() {
        inner.repair.save_repaired_config()?;
        tracing::info!(count = result.repairs.len(), "Applied configuration repairs");
    }

    inner.status.repair_count += 1;
    inner.status.last_repair_at = Some(Utc::now());
    inner.save_status();
    Ok(())
}

async fn evolve_cycle(inner: &Arc<Mutex<Inner>>) -> Result<()> {
    let mut guard = inner.lock().await;
    let inner = &mut *guard;

    if !inner.evolution.is_initialized() {
        let snapshot = inner.store.load_snapshot()?;
        inner.evolution.initialize(&snapshot);
    }

    let metrics = inner.metrics.compute();
    let best = inner.evolution.evolve(&metrics)?;
    inner.status.current_generation = inner.evolution.generation();
    inner.status.best_fitness = Some(best.fitness);

    if best.fitness > EVOLVE_SAVE_THRESHOLD {
        inner.evolution.save_best_config(&inner.store)?;
    }

    inner.status.evolve_count += 1;
    inner.status.last_evolve_at = Some(Utc::now());
    inner.save_status();
    Ok(())
}

async fn replicate_cycle(inner: &Arc<Mutex<Inner>>) -> Result<()> {
    let mut guard = inner.lock().await;
    let inner = &mut *guard;

    let Some(best) = inner.evolution.best().cloned() else {
        tracing::debug!("No best individual yet, skipping replication");
        return Ok(());
    };
    if best.fitness < REPLICATION_MIN_FITNESS {
        tracing::debug!(fitness = best.fitness, "Best fitness below replication bar");
        return Ok(());
    }

    inner.replication.load_manifest();
    if inner.replication.clones().len() >= MAX_CLONES {
        inner.replication.prune_weak_clones(MAX_CLONES - 1)?;
    }
    inner
        .replication
        .spawn_clone(&best.config, best.generation, best.fitness)?;

    inner.status.clone_count = inner.replication.clones().len();
    inner.status.replication_count += 1;
    inner.status.last_replication_at = Some(Utc::now());
    inner.save_status();
    Ok(())
}

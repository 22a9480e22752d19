//! evod - autonomous configuration self-management daemon.
//!
//! ## Usage
//! ```bash
//! # One-shot diagnostics and repair
//! evod health
//! evod repair
//!
//! # Run the optimizer for a few generations
//! evod evolve -g 10 -p 20
//!
//! # Background maintenance
//! evod daemon start --repair-interval 300000
//! evod daemon status
//! evod daemon stop
//!
//! # Clone workspaces
//! evod clone list
//! evod clone prune -k 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use evod::commands::{CloneCommands, DaemonCommands};
use evod::config::ConfigStore;
use evod::daemon::{control, DaemonIntervals, EvoDaemon};
use evod::evolution::{EvolutionParams, EvolutionaryEngine};
use evod::metrics::{capture_system_snapshot, MetricsCollector};
use evod::repair::{HealthStatus, SelfRepairEngine};
use evod::replication::SelfReplicationEngine;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "evod")]
#[command(about = "Autonomous configuration self-management daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// State directory override (default ~/.evod, or EVOD_STATE_DIR)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run configuration health checks
    Health,
    /// Apply idempotent configuration repairs
    Repair,
    /// Run the evolutionary optimizer and save the best configuration
    Evolve {
        /// Number of generations to run
        #[arg(short = 'g', long, default_value = "5")]
        generations: u32,
        /// Population size
        #[arg(short = 'p', long, default_value = "10")]
        population: usize,
    },
    /// Daemon lifecycle management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Clone workspace management
    Clone {
        #[command(subcommand)]
        command: CloneCommands,
    },
    /// Print the current metrics snapshot
    Metrics,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let store = match open_store(cli.state_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("⚠ {e:#}");
            std::process::exit(1);
        }
    };

    match run(cli.command, store).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("⚠ {e:#}");
            std::process::exit(1);
        }
    }
}

fn open_store(state_dir: Option<PathBuf>) -> Result<ConfigStore> {
    match state_dir {
        Some(dir) => ConfigStore::at(dir),
        None => ConfigStore::open(),
    }
}

async fn run(command: Commands, store: ConfigStore) -> Result<i32> {
    match command {
        Commands::Health => cmd_health(&store),
        Commands::Repair => cmd_repair(&store),
        Commands::Evolve {
            generations,
            population,
        } => cmd_evolve(&store, generations, population),
        Commands::Daemon { command } => cmd_daemon(store, command).await,
        Commands::Clone { command } => cmd_clone(&store, command),
        Commands::Metrics => cmd_metrics(&store),
    }
}

fn cmd_health(store: &ConfigStore) -> Result<i32> {
    let mut engine = SelfRepairEngine::new(store.clone());
    engine.load_config()?;

    let checks = engine.run_health_checks()?;
    let mut critical = false;
    for check in &checks {
        let marker = match check.status {
            HealthStatus::Healthy => "✅",
            HealthStatus::Warning => "⚠️ ",
            HealthStatus::Critical => "❌",
        };
        println!("{marker} {}: {}", check.name, check.message);
        if let Some(suggestion) = &check.suggestion {
            println!("   → {suggestion}");
        }
        critical |= check.status == HealthStatus::Critical;
    }

    if critical {
        eprintln!("⚠ Critical configuration problems found.");
        return Ok(1);
    }
    Ok(0)
}

fn cmd_repair(store: &ConfigStore) -> Result<i32> {
    let mut engine = SelfRepairEngine::new(store.clone());
    engine.load_config()?;

    let result = engine.repair();
    if !result.success || !result.errors.is_empty() {
        eprintln!("⚠ Repair failed: {}", result.errors.join("; "));
        return Ok(1);
    }

    if result.repairs.is_empty() {
        println!("Nothing to repair.");
        return Ok(0);
    }

    for action in &result.repairs {
        println!("🔧 {} ({} → {})", action.description, action.before, action.after);
    }
    engine.save_repaired_config()?;
    println!("✅ Applied {} repair(s).", result.repairs.len());
    Ok(0)
}

fn cmd_evolve(store: &ConfigStore, generations: u32, population: usize) -> Result<i32> {
    let seed = store.load_snapshot()?;
    let mut collector = MetricsCollector::new(store);
    collector.load();

    let params = EvolutionParams {
        population_size: population,
        max_generations: generations,
        ..Default::default()
    };
    let mut engine = EvolutionaryEngine::new(params);
    engine.initialize(&seed);

    for _ in 0..generations {
        engine.evolve(&collector.compute())?;
    }

    for stats in engine.evolution_history() {
        println!(
            "gen {:>3}  best {:.4}  mean {:.4}  diversity {:.4}",
            stats.generation, stats.best_fitness, stats.mean_fitness, stats.diversity
        );
    }
    engine.save_best_config(store)?;

    if let Some(best) = engine.best() {
        println!("✅ Best fitness {:.4} saved to {}", best.fitness, store.models_path().display());
    }
    Ok(0)
}

async fn cmd_daemon(store: ConfigStore, command: DaemonCommands) -> Result<i32> {
    match command {
        DaemonCommands::Start {
            repair_interval,
            evolve_interval,
            replicate_interval,
        } => {
            let intervals = DaemonIntervals {
                repair: Duration::from_millis(repair_interval),
                evolve: Duration::from_millis(evolve_interval),
                replicate: Duration::from_millis(replicate_interval),
            };
            let mut daemon = EvoDaemon::new(store, intervals);
            if !daemon.start().await? {
                eprintln!("⚠ Daemon already running.");
                return Ok(1);
            }
            println!("✅ Daemon started (pid {}). Ctrl+C to stop.", std::process::id());

            wait_for_shutdown().await;
            daemon.stop().await?;
            println!("Daemon stopped.");
            Ok(0)
        }
        DaemonCommands::Stop => {
            control::stop(&store)?;
            Ok(0)
        }
        DaemonCommands::Status => {
            control::print_status(&store);
            Ok(0)
        }
    }
}

fn cmd_clone(store: &ConfigStore, command: CloneCommands) -> Result<i32> {
    let mut engine = SelfReplicationEngine::new(store.clone());
    engine.load_manifest();

    match command {
        CloneCommands::List => {
            if engine.clones().is_empty() {
                println!("No clones tracked.");
                return Ok(0);
            }
            println!("{} clone(s), cap {}:", engine.clones().len(), engine.max_clones());
            for clone in engine.clones() {
                println!(
                    "  {}  gen {:>3}  fitness {:.4}  {}",
                    clone.id,
                    clone.generation,
                    clone.fitness,
                    clone.dir.display()
                );
            }
            Ok(0)
        }
        CloneCommands::Prune { keep } => {
            let removed = engine.prune_weak_clones(keep)?;
            println!("Pruned {removed} clone(s), {} kept.", engine.clones().len());
            Ok(0)
        }
        CloneCommands::Spawn => {
            let config = store.load_snapshot()?;
            let mut collector = MetricsCollector::new(store);
            collector.load();
            let metrics = collector.compute();
            let fitness = evod::evolution::fitness(&(&metrics).into());

            match engine.spawn_clone(&config, 0, fitness)? {
                Some(record) => {
                    println!("✅ Spawned clone {} (fitness {:.4})", record.id, record.fitness);
                    Ok(0)
                }
                None => {
                    eprintln!("⚠ Clone cap reached ({}); prune first.", engine.max_clones());
                    Ok(1)
                }
            }
        }
    }
}

fn cmd_metrics(store: &ConfigStore) -> Result<i32> {
    let mut collector = MetricsCollector::new(store);
    collector.load();

    let metrics = collector.compute();
    println!("Window:            {} call(s)", collector.len());
    println!("Avg duration:      {:.1} ms", metrics.avg_duration_ms);
    println!("Error rate:        {:.1}%", metrics.error_rate * 100.0);
    println!("Task completion:   {:.1}%", metrics.task_completion_rate * 100.0);
    println!("Memory pressure:   {:.1}%", metrics.memory_pressure * 100.0);

    let system = capture_system_snapshot(store.state_dir());
    println!("Free memory:       {:.1}%", system.free_memory_ratio * 100.0);
    println!("Load per core:     {:.2}", system.load_per_core);
    println!("Free disk:         {:.1}%", system.free_disk_ratio * 100.0);
    Ok(0)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Initialize tracing with proper configuration
fn init_tracing(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("evod={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

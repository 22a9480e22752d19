use clap::Subcommand;

/// Daemon lifecycle subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum DaemonCommands {
    /// Start the maintenance daemon (runs in the foreground)
    Start {
        /// Repair cycle interval in milliseconds
        #[arg(long, default_value = "300000", value_parser = clap::value_parser!(u64).range(1..))]
        repair_interval: u64,
        /// Evolve cycle interval in milliseconds
        #[arg(long, default_value = "3600000", value_parser = clap::value_parser!(u64).range(1..))]
        evolve_interval: u64,
        /// Replication cycle interval in milliseconds
        #[arg(long, default_value = "7200000", value_parser = clap::value_parser!(u64).range(1..))]
        replicate_interval: u64,
    },
    /// Stop a running daemon
    Stop,
    /// Show the persisted daemon status
    Status,
}

/// Clone workspace subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CloneCommands {
    /// List tracked clone workspaces
    List,
    /// Prune the weakest clones, keeping the fittest
    Prune {
        /// How many clones to keep
        #[arg(short = 'k', long, default_value = "5")]
        keep: usize,
    },
    /// Spawn a clone of the current configuration
    Spawn,
}

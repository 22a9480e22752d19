//! Out-of-process daemon control: signal the lock owner, print status.

use crate::config::ConfigStore;
use crate::daemon::lock::{process_alive, PidLock};
use crate::daemon::EvoDaemon;
use anyhow::Result;
use std::fs;
use std::thread::sleep;
use std::time::Duration;

/// Signal the running daemon and wait for it to exit.
///
/// Returns `false` when no live daemon owns the lock.
pub fn stop(store: &ConfigStore) -> Result<bool> {
    let lock_path = store.lock_path();
    let Some(pid) = PidLock::owner_pid(&lock_path) else {
        println!("No running daemon found.");
        return Ok(false);
    };
    if !process_alive(pid) {
        println!("Removing stale lock (pid {pid} is gone).");
        let _ = fs::remove_file(&lock_path);
        return Ok(false);
    }

    println!("Stopping daemon (pid {pid})...");
    terminate(pid, false);

    // Wait up to 5 s for the owner to release the lock.
    for _ in 0..25 {
        sleep(Duration::from_millis(200));
        if !lock_path.exists() || !process_alive(pid) {
            println!("Daemon stopped.");
            return Ok(true);
        }
    }

    // Force-kill anything still alive and clear the lock ourselves.
    terminate(pid, true);
    let _ = fs::remove_file(&lock_path);
    println!("Daemon stopped (forced).");
    Ok(true)
}

/// Print the persisted daemon status snapshot.
pub fn print_status(store: &ConfigStore) {
    let Some(status) = EvoDaemon::read_status(store) else {
        println!("no status file found");
        return;
    };

    if status.running {
        println!(
            "Daemon running (pid {})",
            status.pid.map_or_else(|| "?".into(), |p| p.to_string())
        );
    } else {
        println!("Daemon not running");
    }
    if let Some(at) = status.started_at {
        println!("  started:          {at}");
    }
    println!("  repair cycles:    {}", status.repair_count);
    println!("  evolve cycles:    {}", status.evolve_count);
    println!("  replications:     {}", status.replication_count);
    println!("  generation:       {}", status.current_generation);
    if let Some(fitness) = status.best_fitness {
        println!("  best fitness:     {fitness:.4}");
    }
    println!("  clones:           {}", status.clone_count);
    if let Some(at) = status.last_repair_at {
        println!("  last repair:      {at}");
    }
    if let Some(at) = status.last_evolve_at {
        println!("  last evolve:      {at}");
    }
    if let Some(at) = status.last_replication_at {
        println!("  last replication: {at}");
    }
}

#[cfg(unix)]
fn terminate(pid: u32, force: bool) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let _ = kill(Pid::from_raw(pid as i32), signal);
}

#[cfg(not(unix))]
fn terminate(_pid: u32, _force: bool) {}

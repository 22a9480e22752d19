//! Single-instance PID lock with staleness detection.
//!
//! The lock file holds the owner's PID in plain text. Acquisition is an
//! atomic create-exclusive; when the file already exists the recorded
//! owner is probed with a zero-effect signal, and a dead owner's lock is
//! reclaimed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct PidLock {
    path: PathBuf,
    held: bool,
}

impl PidLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: false,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Acquire the lock for this process.
    ///
    /// A live owner yields `LockError::AlreadyRunning`; a stale lock
    /// (dead or unreadable owner) is removed and acquisition retried
    /// once.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        for attempt in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    crate::config::store::restrict_file(&self.path);
                    self.held = true;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match Self::owner_pid(&self.path) {
                        Some(pid) if process_alive(pid) => {
                            return Err(LockError::AlreadyRunning { pid });
                        }
                        _ => {
                            // Stale or unreadable: reclaim and retry.
                            tracing::warn!(
                                "Removing stale lock file {}",
                                self.path.display()
                            );
                            fs::remove_file(&self.path)?;
                            if attempt == 1 {
                                return Err(e.into());
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("lock acquisition loop always returns")
    }

    /// Delete the lock file. Only removes a lock this instance holds.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Could not remove lock file {}: {e}", self.path.display());
        }
        self.held = false;
    }

    /// PID recorded in a lock file, if present and parseable.
    pub fn owner_pid(path: &std::path::Path) -> Option<u32> {
        let contents = fs::read_to_string(path).ok()?;
        contents.trim().parse().ok()
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Probe a PID with a zero-effect signal.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    // No cheap probe available; treat the owner as alive to stay safe.
    true
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance enforcement via `agent.lock`.
//!
//! Combines an OS exclusive lock with a liveness record
//! (`"<pid>|<RFC3339 heartbeat>"`) so a crashed owner's lock can be
//! detected and taken over. The owner holds the exclusive lock for its
//! whole lifetime and refreshes the heartbeat in place; a reader that can
//! grab the lock knows the previous owner died without releasing.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::platform;

/// Heartbeats older than this mark the lock stale.
pub const LOCK_STALE_TIMEOUT: Duration = Duration::from_secs(120);

/// How the lock was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// No previous lock file existed.
    Acquired,
    /// A stale lock from a dead owner was taken over.
    TakenOverStale,
}

#[derive(Debug, Error)]
pub enum SingletonError {
    #[error("another agent instance is running{}", pid.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    HeldByLiveProcess { pid: Option<u32> },
    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content of the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub heartbeat: DateTime<Utc>,
}

impl LockRecord {
    pub fn current() -> Self {
        LockRecord { pid: std::process::id(), heartbeat: Utc::now() }
    }

    pub fn to_line(&self) -> String {
        format!("{}|{}", self.pid, self.heartbeat.to_rfc3339())
    }

    pub fn parse(content: &str) -> Option<LockRecord> {
        let (pid, stamp) = content.trim().split_once('|')?;
        Some(LockRecord {
            pid: pid.parse().ok()?,
            heartbeat: DateTime::parse_from_rfc3339(stamp).ok()?.with_timezone(&Utc),
        })
    }

    /// Stale when the recorded process is gone or the heartbeat has not
    /// been refreshed within `stale_timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_timeout: Duration) -> bool {
        if !platform::pid_is_alive(self.pid) {
            return true;
        }
        let age = now.signed_duration_since(self.heartbeat);
        age > chrono::Duration::from_std(stale_timeout).unwrap_or(chrono::Duration::zero())
    }
}

struct GuardInner {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

/// Holder of the per-host singleton lock.
pub struct SingletonGuard {
    inner: Arc<GuardInner>,
    heartbeat: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SingletonGuard {
    /// Attempt to acquire the lock at `path`.
    pub fn acquire(path: &Path) -> Result<(SingletonGuard, AcquireOutcome), SingletonError> {
        match std::fs::OpenOptions::new().read(true).write(true).create_new(true).open(path) {
            Ok(file) => {
                if let Err(e) = file.try_lock_exclusive() {
                    // We created the file; nobody else can hold it yet.
                    error!(path = %path.display(), %e, "fresh lock file refused exclusive lock");
                    let _ = std::fs::remove_file(path);
                    return Err(SingletonError::Io(e));
                }
                let guard = SingletonGuard::own(path, file)?;
                info!(path = %path.display(), "acquired singleton lock");
                Ok((guard, AcquireOutcome::Acquired))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Self::acquire_existing(path)
            }
            Err(e) => Err(SingletonError::Io(e)),
        }
    }

    fn acquire_existing(path: &Path) -> Result<(SingletonGuard, AcquireOutcome), SingletonError> {
        info!(path = %path.display(), "lock file exists, checking for staleness");
        // Never truncate before holding the lock: the content belongs to
        // the running owner until proven stale.
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;

        if file.try_lock_exclusive().is_err() {
            let pid = read_record(&mut file).map(|r| r.pid);
            error!(path = %path.display(), ?pid, "lock actively held by another process");
            return Err(SingletonError::HeldByLiveProcess { pid });
        }

        // Lock obtained on an existing file: the previous owner did not
        // release. Validate staleness before taking over.
        let record = read_record(&mut file);
        let stale = match &record {
            None => {
                warn!("existing lock file has no readable record, assuming stale");
                true
            }
            Some(record) => record.is_stale(Utc::now(), LOCK_STALE_TIMEOUT),
        };

        if !stale {
            let pid = record.map(|r| r.pid);
            error!(?pid, "lock file owned by a live process, cannot acquire");
            let _ = fs2::FileExt::unlock(&file);
            return Err(SingletonError::HeldByLiveProcess { pid });
        }

        warn!(previous = ?record, "stale lock detected, taking over");
        let guard = SingletonGuard::own(path, file)?;
        Ok((guard, AcquireOutcome::TakenOverStale))
    }

    fn own(path: &Path, mut file: File) -> Result<SingletonGuard, SingletonError> {
        write_record(&mut file, &LockRecord::current())?;
        Ok(SingletonGuard {
            inner: Arc::new(GuardInner {
                path: path.to_path_buf(),
                file: Mutex::new(Some(file)),
            }),
            heartbeat: Mutex::new(None),
        })
    }

    /// Refresh the heartbeat on a timer so other processes can tell this
    /// owner is alive. Cadence gives a live owner a safe margin before
    /// the stale timeout.
    pub fn start_heartbeat(&self, stale_timeout: Duration) {
        let cadence = Duration::from_secs((stale_timeout.as_secs() / 2).max(15));
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The interval's first tick fires immediately.
            loop {
                ticker.tick().await;
                let mut slot = inner.file.lock().unwrap_or_else(|e| e.into_inner());
                let Some(file) = slot.as_mut() else {
                    debug!("heartbeat loop: lock released, stopping");
                    break;
                };
                if let Err(e) = write_record(file, &LockRecord::current()) {
                    error!(%e, "heartbeat refresh failed, stopping loop");
                    break;
                }
                debug!("lock heartbeat refreshed");
            }
        });
        *self.heartbeat.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Release the lock: stop the heartbeat, drop the handle (implicitly
    /// releasing the OS lock), delete the file. Safe to call repeatedly.
    pub fn release(&self) {
        if let Some(task) = self.heartbeat.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        let file = self.inner.file.lock().unwrap_or_else(|e| e.into_inner()).take();
        if file.is_some() {
            drop(file);
            match std::fs::remove_file(&self.inner.path) {
                Ok(()) => info!(path = %self.inner.path.display(), "released singleton lock"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!(path = %self.inner.path.display(), %e, "failed to remove lock file"),
            }
        }
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_record(file: &mut File) -> Option<LockRecord> {
    file.seek(SeekFrom::Start(0)).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    LockRecord::parse(&content)
}

fn write_record(file: &mut File, record: &LockRecord) -> std::io::Result<()> {
    let line = record.to_line();
    file.seek(SeekFrom::Start(0))?;
    file.write_all(line.as_bytes())?;
    file.set_len(line.len() as u64)?;
    file.sync_all()
}

#[cfg(test)]
#[path = "singleton_tests.rs"]
mod tests;

//! Advisory lock over the data directory.
//!
//! The lock is a file created with `create_new`; its body records the holder
//! and an expiry. An acquirer that finds an expired record reclaims it. Reclaim
//! and release re-read the record while holding an `fs2` exclusive lock on a
//! sidecar `.guard` file, so two reclaimers cannot both delete a fresh lock.

use crate::error::TimefoldError;
use crate::fold::util::{fingerprint_hex, now_epoch_millis};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub token: String,
    pub acquired_at_epoch_ms: u64,
    pub expires_at_epoch_ms: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_epoch_ms
    }
}

#[derive(Debug)]
pub struct DataLock {
    path: PathBuf,
    max_hold: Duration,
    tokens: AtomicU64,
}

impl DataLock {
    pub fn new(path: impl Into<PathBuf>, max_hold: Duration) -> Self {
        Self {
            path: path.into(),
            max_hold,
            tokens: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".guard");
        self.path.with_file_name(name)
    }

    /// Block for at most `timeout` waiting for the lock.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(TimefoldError::LockTimeout {
                    path: self.path.clone(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
            thread::sleep(RETRY_INTERVAL.min(timeout - waited));
        }
    }

    /// One attempt. `Ok(None)` means another live holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => self.stamp(file).map(Some),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                self.reclaim_if_expired()?;
                Ok(None)
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to create {}", self.path.display()))
            }
        }
    }

    fn stamp(&self, mut file: File) -> Result<LockGuard> {
        let now_ms = now_epoch_millis()?;
        let sequence = self.tokens.fetch_add(1, Ordering::Relaxed);
        let record = LockRecord {
            pid: std::process::id(),
            token: fingerprint_hex(self.path.as_os_str().as_encoded_bytes(), sequence, 16),
            acquired_at_epoch_ms: now_ms,
            expires_at_epoch_ms: now_ms
                .saturating_add(u64::try_from(self.max_hold.as_millis()).unwrap_or(u64::MAX)),
        };

        let written = serde_json::to_vec(&record)
            .map_err(anyhow::Error::from)
            .and_then(|body| {
                file.write_all(&body)?;
                file.sync_all()?;
                Ok(())
            });
        if let Err(err) = written {
            let _ = fs::remove_file(&self.path);
            return Err(err.context(format!("failed to write {}", self.path.display())));
        }

        Ok(LockGuard {
            path: self.path.clone(),
            guard_path: self.guard_path(),
            token: record.token,
            released: false,
        })
    }

    /// Current holder, if any. An unreadable body yields `Ok(None)`.
    pub fn inspect(&self) -> Result<Option<LockRecord>> {
        read_record(&self.path)
    }

    fn reclaim_if_expired(&self) -> Result<()> {
        let seen = read_record(&self.path)?;
        if !self.looks_stale(seen.as_ref())? {
            return Ok(());
        }

        with_guard(&self.guard_path(), || {
            // Someone may have released and re-acquired since the first read.
            let current = read_record(&self.path)?;
            if current != seen || !self.looks_stale(current.as_ref())? {
                return Ok(());
            }
            match fs::remove_file(&self.path) {
                Ok(()) => {
                    eprintln!(
                        "timefold lock: reclaimed expired lock {} (holder pid {})",
                        self.path.display(),
                        current.map(|r| r.pid.to_string()).unwrap_or_else(|| "unknown".into())
                    );
                    Ok(())
                }
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err)
                    .with_context(|| format!("failed to reclaim {}", self.path.display())),
            }
        })
    }

    fn looks_stale(&self, record: Option<&LockRecord>) -> Result<bool> {
        match record {
            Some(record) => Ok(record.is_expired(now_epoch_millis()?)),
            None => {
                // Unreadable body: judge by age so a half-written lock from a
                // crashed holder still expires.
                let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("failed to stat {}", self.path.display()));
                    }
                };
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default();
                Ok(age >= self.max_hold)
            }
        }
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };
    Ok(serde_json::from_str(&raw).ok())
}

fn with_guard<T>(guard_path: &Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(guard_path)
        .with_context(|| format!("failed to open {}", guard_path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("failed to lock {}", guard_path.display()))?;
    let out = body();
    let _ = file.unlock();
    out
}

/// Proof of holding the data lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    guard_path: PathBuf,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let path = self.path.clone();
        let token = self.token.clone();
        with_guard(&self.guard_path, || match read_record(&path)? {
            Some(record) if record.token == token => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => {
                    Err(err).with_context(|| format!("failed to release {}", path.display()))
                }
            },
            // Expired and taken over by someone else; theirs to remove.
            _ => Ok(()),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            eprintln!("timefold lock: release failed: {err:#}");
        }
    }
}

//! Advisory, collection-scoped file locks with bounded exponential backoff.
//!
//! Each collection has a sibling `<name>.lock` file. Writers take it
//! exclusively, readers take it shared. Locks are `flock`-style advisory locks
//! (via `fs2`), bound to the open file description, so two handles in the same
//! process contend exactly like two processes do.
//!
//! Acquisition never blocks in the kernel: it polls `try_lock_*` and sleeps
//! with exponential backoff until the configured bound, then fails with
//! `LockTimeout`. A crashed holder releases its lock when its descriptor is
//! closed, so the bound only matters for live-but-stuck holders.

use crate::core::error::MissionctlError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 2;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held lock; released on drop, including on error paths.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to release collection lock"
            );
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis((BASE_DELAY_MS.saturating_mul(1u64 << exp)).min(MAX_DELAY_MS))
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn try_lock(file: &File, mode: LockMode) -> std::io::Result<()> {
    match mode {
        LockMode::Shared => FileExt::try_lock_shared(file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(file),
    }
}

/// Acquire `lock_path` in `mode`, retrying with backoff for at most `timeout`.
pub fn acquire(
    lock_path: &Path,
    collection: &str,
    mode: LockMode,
    timeout: Duration,
) -> Result<LockGuard, MissionctlError> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(MissionctlError::IoError)?;

    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        match try_lock(&file, mode) {
            Ok(()) => {
                return Ok(LockGuard {
                    file,
                    path: lock_path.to_path_buf(),
                    mode,
                });
            }
            Err(e) if is_contended(&e) => {
                let waited = started.elapsed();
                if waited >= timeout {
                    tracing::warn!(
                        collection,
                        attempts = attempt + 1,
                        waited_ms = waited.as_millis() as u64,
                        "collection lock not acquired within bound"
                    );
                    return Err(MissionctlError::LockTimeout {
                        collection: collection.to_string(),
                        waited_ms: waited.as_millis() as u64,
                    });
                }
                attempt += 1;
                let delay = backoff_delay(attempt).min(timeout - waited);
                tracing::trace!(
                    collection,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "collection lock contended"
                );
                thread::sleep(delay);
            }
            Err(e) => return Err(MissionctlError::IoError(e)),
        }
    }
}

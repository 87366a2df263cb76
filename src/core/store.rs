//! Line-delimited JSON record store for the mission, task and job collections.
//!
//! Each collection is one `<name>.jsonl` file holding one whole record per
//! line, in insertion order. Mutations go through a collection-scoped
//! exclusive lock (see [`crate::core::lock`]); reads take the same lock
//! shared, so a reader never observes a half-rewritten collection.
//!
//! - `append` adds a line at the end of the file.
//! - `update` rewrites the whole collection into a temp file and renames it
//!   over the original, so a failed update leaves the prior state intact.
//! - Lines that do not parse are skipped on read (with a warning) and carried
//!   through rewrites verbatim, so one bad line never costs the others.
//!
//! There is no index: `list`, `get` and `update` are linear in the size of
//! the collection.

use crate::core::error::MissionctlError;
use crate::core::lock::{self, LockGuard, LockMode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Missions,
    Tasks,
    Jobs,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Missions, Collection::Tasks, Collection::Jobs];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Missions => "missions",
            Collection::Tasks => "tasks",
            Collection::Jobs => "jobs",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.jsonl", self.name())
    }

    fn lock_file_name(self) -> String {
        format!("{}.lock", self.name())
    }
}

/// A record persisted in one of the store's collections.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Store handle over a data directory. Owns no open files between calls.
#[derive(Debug, Clone)]
pub struct Store {
    /// Directory holding the collection files.
    pub root: PathBuf,
    /// Bound on lock acquisition before `LockTimeout`.
    pub lock_timeout: Duration,
}

impl Store {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MissionctlError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(MissionctlError::IoError)?;
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn collection_path(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.file_name())
    }

    pub fn lock_path(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.lock_file_name())
    }

    fn lock(&self, collection: Collection, mode: LockMode) -> Result<LockGuard, MissionctlError> {
        lock::acquire(
            &self.lock_path(collection),
            collection.name(),
            mode,
            self.lock_timeout,
        )
    }

    fn read_raw(&self, collection: Collection) -> Result<String, MissionctlError> {
        let path = self.collection_path(collection);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(MissionctlError::IoError(e)),
        }
    }

    /// Append `record`; its id must not already exist in the collection.
    pub fn append<R: Record>(&self, record: &R) -> Result<(), MissionctlError> {
        let _guard = self.lock(R::COLLECTION, LockMode::Exclusive)?;
        let raw = self.read_raw(R::COLLECTION)?;
        if find_record::<R>(&raw, record.id()).is_some() {
            return Err(MissionctlError::ValidationError(format!(
                "duplicate id '{}' in {}",
                record.id(),
                R::COLLECTION.name()
            )));
        }
        self.append_line(R::COLLECTION, &raw, record)
    }

    /// Append `record` unless a record with the same id exists; returns the
    /// stored record and whether it was inserted by this call.
    pub fn insert_if_absent<R: Record>(&self, record: R) -> Result<(R, bool), MissionctlError> {
        let _guard = self.lock(R::COLLECTION, LockMode::Exclusive)?;
        let raw = self.read_raw(R::COLLECTION)?;
        if let Some((_, existing)) = find_record::<R>(&raw, record.id()) {
            return Ok((existing, false));
        }
        self.append_line(R::COLLECTION, &raw, &record)?;
        Ok((record, true))
    }

    fn append_line<R: Record>(
        &self,
        collection: Collection,
        existing: &str,
        record: &R,
    ) -> Result<(), MissionctlError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        // A torn tail from an interrupted append must not swallow this record.
        if !existing.is_empty() && !existing.ends_with('\n') {
            line.insert(0, '\n');
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))
            .map_err(MissionctlError::IoError)?;
        f.write_all(line.as_bytes()).map_err(MissionctlError::IoError)?;
        f.sync_data().map_err(MissionctlError::IoError)?;
        Ok(())
    }

    /// All well-formed records in insertion order.
    pub fn list<R: Record>(&self) -> Result<Vec<R>, MissionctlError> {
        let raw = {
            let _guard = self.lock(R::COLLECTION, LockMode::Shared)?;
            self.read_raw(R::COLLECTION)?
        };
        let mut out = Vec::new();
        for (idx, line) in non_empty_lines(&raw).enumerate() {
            match serde_json::from_str::<R>(line) {
                Ok(record) => out.push(record),
                Err(e) => warn_malformed(R::COLLECTION, idx, &e),
            }
        }
        Ok(out)
    }

    pub fn get<R: Record>(&self, id: &str) -> Result<R, MissionctlError> {
        let raw = {
            let _guard = self.lock(R::COLLECTION, LockMode::Shared)?;
            self.read_raw(R::COLLECTION)?
        };
        find_record(&raw, id)
            .map(|(_, record)| record)
            .ok_or_else(|| not_found::<R>(id))
    }

    /// Apply `mutator` to the record with `id` and rewrite the collection.
    ///
    /// If the mutator fails nothing is written. The record id is immutable.
    pub fn update<R, F>(&self, id: &str, mutator: F) -> Result<R, MissionctlError>
    where
        R: Record,
        F: FnOnce(&mut R) -> Result<(), MissionctlError>,
    {
        let _guard = self.lock(R::COLLECTION, LockMode::Exclusive)?;
        let raw = self.read_raw(R::COLLECTION)?;
        let lines: Vec<&str> = non_empty_lines(&raw).collect();
        let (idx, mut record) = find_record::<R>(&raw, id).ok_or_else(|| not_found::<R>(id))?;
        mutator(&mut record)?;
        if record.id() != id {
            return Err(MissionctlError::ValidationError(format!(
                "record id is immutable ('{}' -> '{}')",
                id,
                record.id()
            )));
        }
        let replacement = serde_json::to_string(&record)?;

        let mut out = String::with_capacity(raw.len() + replacement.len());
        for (i, line) in lines.iter().enumerate() {
            out.push_str(if i == idx { replacement.as_str() } else { *line });
            out.push('\n');
        }
        write_atomic(&self.collection_path(R::COLLECTION), out.as_bytes())?;
        Ok(record)
    }
}

fn non_empty_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().filter(|l| !l.trim().is_empty())
}

/// First well-formed record with `id` and its index among non-empty lines.
///
/// Lines that do not parse as `R` are skipped exactly as `list` skips them,
/// even when their `id` matches.
fn find_record<R: Record>(raw: &str, id: &str) -> Option<(usize, R)> {
    for (idx, line) in non_empty_lines(raw).enumerate() {
        match serde_json::from_str::<R>(line) {
            Ok(record) if record.id() == id => return Some((idx, record)),
            Ok(_) => {}
            Err(e) => warn_malformed(R::COLLECTION, idx, &e),
        }
    }
    None
}

fn warn_malformed(collection: Collection, idx: usize, err: &serde_json::Error) {
    tracing::warn!(
        collection = collection.name(),
        line = idx + 1,
        error = %err,
        "skipping malformed record line"
    );
}

fn not_found<R: Record>(id: &str) -> MissionctlError {
    let kind = R::COLLECTION.name().trim_end_matches('s');
    MissionctlError::NotFound(format!("{} '{}'", kind, id))
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MissionctlError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| MissionctlError::PathError(format!("no file name in {}", path.display())))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));
    {
        let mut f = fs::File::create(&tmp).map_err(MissionctlError::IoError)?;
        f.write_all(bytes).map_err(MissionctlError::IoError)?;
        f.sync_all().map_err(MissionctlError::IoError)?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(MissionctlError::IoError(e));
    }
    tracing::debug!(path = %path.display(), "atomic write completed");
    Ok(())
}

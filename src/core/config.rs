//! Project configuration loaded from `.missionctl/config.toml`.
//!
//! A missing file means defaults. Relative paths resolve against the project
//! root the file was loaded for.

use crate::core::error::MissionctlError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".missionctl";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory for the collection files and the lifecycle audit log.
    pub data_dir: PathBuf,
    /// Where job descriptors are written for the worker.
    pub outbound_dir: PathBuf,
    /// Where the worker drops result files.
    pub inbound_dir: PathBuf,
    /// Root that `write_file` / `patch_file` effects are confined to.
    pub workspace_root: PathBuf,
    /// Prefix for descriptor `session_id` (`<prefix>_<mission_id>`).
    pub session_prefix: String,
    /// Maximum follow-up depth below a client-created job. 0 disables follow-ups.
    pub max_followup_depth: u32,
    /// Maximum non-terminal jobs per mission.
    pub max_outstanding_jobs: usize,
    pub lock_timeout_ms: u64,
    /// Dispatch follow-up jobs as soon as they are created.
    pub auto_dispatch_followups: bool,
    /// Keep inbound result files after a job is committed.
    pub keep_results: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".missionctl/data"),
            outbound_dir: PathBuf::from(".missionctl/queue/out"),
            inbound_dir: PathBuf::from(".missionctl/queue/in"),
            workspace_root: PathBuf::from("."),
            session_prefix: "core".to_string(),
            max_followup_depth: 8,
            max_outstanding_jobs: 256,
            lock_timeout_ms: 5_000,
            auto_dispatch_followups: true,
            keep_results: false,
        }
    }
}

impl Config {
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load `<project_root>/.missionctl/config.toml` (or defaults) and
    /// resolve every path against `project_root`.
    pub fn load(project_root: &Path) -> Result<Self, MissionctlError> {
        let path = Self::config_path(project_root);
        let config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(MissionctlError::IoError)?;
            Self::parse(&content).map_err(|e| {
                MissionctlError::ValidationError(format!("{}: {}", path.display(), e))
            })?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config.resolved(project_root))
    }

    pub fn parse(content: &str) -> Result<Self, MissionctlError> {
        toml::from_str(content).map_err(|e| MissionctlError::ValidationError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), MissionctlError> {
        if self.max_outstanding_jobs == 0 {
            return Err(MissionctlError::ValidationError(
                "max_outstanding_jobs must be at least 1".to_string(),
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(MissionctlError::ValidationError(
                "lock_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.session_prefix.trim().is_empty() {
            return Err(MissionctlError::ValidationError(
                "session_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Same config with relative paths joined onto `project_root`.
    pub fn resolved(mut self, project_root: &Path) -> Self {
        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                project_root.join(p)
            }
        };
        self.data_dir = resolve(self.data_dir);
        self.outbound_dir = resolve(self.outbound_dir);
        self.inbound_dir = resolve(self.inbound_dir);
        self.workspace_root = resolve(self.workspace_root);
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Default config file body written by `missionctl init`.
    pub fn default_toml() -> Result<String, MissionctlError> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| MissionctlError::ValidationError(e.to_string()))
    }
}

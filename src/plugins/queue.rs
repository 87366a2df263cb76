//! Filesystem job queue shared with the external worker.
//!
//! - `dispatch` writes `<outbound>/<job_id>.job.json` atomically
//!   (temp + rename). The name depends only on the job id and the body only on
//!   the stored records, so re-dispatching rewrites the same descriptor.
//! - `collect` looks for `<inbound>/<job_id>.result.json`. Absence is
//!   `Pending`; a file that is not a single JSON object is `Rejected`.
//!   It never waits: polling cadence belongs to the caller.
//!
//! The worker is expected to publish result files with a rename as well; a
//! torn file therefore shows up as `Rejected`, never as a silent success.

use crate::core::config::Config;
use crate::core::error::MissionctlError;
use crate::core::store::write_atomic;
use crate::plugins::missions::{Job, Mission, Params, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_SUFFIX: &str = ".job.json";
pub const RESULT_SUFFIX: &str = ".result.json";
pub const RESPONSE_FORMAT: &str = "action_protocol";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionBrief {
    pub id: String,
    pub title: String,
    pub description: String,
    pub metadata: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBrief {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorPayload {
    pub response_format: String,
    pub mission: MissionBrief,
    pub task: TaskBrief,
    pub params: Params,
}

/// What the worker reads for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    pub kind: String,
    pub session_id: String,
    pub created_at: String,
    pub depth: u32,
    pub payload_hash: String,
    pub payload: DescriptorPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchHandle {
    pub job_id: String,
    pub path: PathBuf,
    pub payload_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    Ready(Value),
    Pending,
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct QueueBridge {
    outbound: PathBuf,
    inbound: PathBuf,
    session_prefix: String,
}

/// Job ids become file names; keep them to a safe alphabet.
pub fn validate_job_id(job_id: &str) -> Result<(), MissionctlError> {
    if job_id.is_empty() {
        return Err(MissionctlError::ValidationError(
            "job_id cannot be empty".to_string(),
        ));
    }
    if job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(MissionctlError::ValidationError(format!(
            "invalid job_id '{}': allowed characters are [A-Za-z0-9_-]",
            job_id
        )))
    }
}

/// Strict parse of a result file body: exactly one JSON object.
pub fn parse_result_text(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty result file, expected a JSON object".to_string());
    }
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return Err("result must be a single JSON object with no surrounding text".to_string());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err("top-level JSON must be an object".to_string()),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn payload_hash(params: &Params) -> Result<String, MissionctlError> {
    let bytes = serde_json::to_vec(params)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

impl QueueBridge {
    pub fn new(
        outbound: impl Into<PathBuf>,
        inbound: impl Into<PathBuf>,
        session_prefix: &str,
    ) -> Result<Self, MissionctlError> {
        let bridge = Self {
            outbound: outbound.into(),
            inbound: inbound.into(),
            session_prefix: session_prefix.to_string(),
        };
        fs::create_dir_all(&bridge.outbound).map_err(MissionctlError::IoError)?;
        fs::create_dir_all(&bridge.inbound).map_err(MissionctlError::IoError)?;
        bridge.recover_interrupted_writes();
        Ok(bridge)
    }

    pub fn from_config(config: &Config) -> Result<Self, MissionctlError> {
        Self::new(
            &config.outbound_dir,
            &config.inbound_dir,
            &config.session_prefix,
        )
    }

    pub fn outbound_dir(&self) -> &Path {
        &self.outbound
    }

    pub fn inbound_dir(&self) -> &Path {
        &self.inbound
    }

    fn recover_interrupted_writes(&self) {
        let Ok(entries) = fs::read_dir(&self.outbound) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                tracing::debug!(path = %path.display(), "removing interrupted descriptor write");
                let _ = fs::remove_file(&path);
            }
        }
    }

    pub fn descriptor_path(&self, job_id: &str) -> Result<PathBuf, MissionctlError> {
        validate_job_id(job_id)?;
        Ok(self.outbound.join(format!("{}{}", job_id, DESCRIPTOR_SUFFIX)))
    }

    pub fn result_path(&self, job_id: &str) -> Result<PathBuf, MissionctlError> {
        validate_job_id(job_id)?;
        Ok(self.inbound.join(format!("{}{}", job_id, RESULT_SUFFIX)))
    }

    pub fn describe(
        &self,
        mission: &Mission,
        task: &Task,
        job: &Job,
    ) -> Result<JobDescriptor, MissionctlError> {
        Ok(JobDescriptor {
            job_id: job.id.clone(),
            kind: task.kind.to_string(),
            session_id: format!("{}_{}", self.session_prefix, mission.id),
            created_at: job.created_at.clone(),
            depth: job.depth,
            payload_hash: payload_hash(&job.payload)?,
            payload: DescriptorPayload {
                response_format: RESPONSE_FORMAT.to_string(),
                mission: MissionBrief {
                    id: mission.id.clone(),
                    title: mission.title.clone(),
                    description: mission.description.clone(),
                    metadata: mission.metadata.clone(),
                },
                task: TaskBrief {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    kind: task.kind.to_string(),
                    params: task.params.clone(),
                },
                params: job.payload.clone(),
            },
        })
    }

    /// Publish the job's descriptor for the worker.
    pub fn dispatch(
        &self,
        mission: &Mission,
        task: &Task,
        job: &Job,
    ) -> Result<DispatchHandle, MissionctlError> {
        let path = self.descriptor_path(&job.id)?;
        let descriptor = self.describe(mission, task, job)?;
        let bytes = serde_json::to_vec_pretty(&descriptor)?;
        write_atomic(&path, &bytes)?;
        Ok(DispatchHandle {
            job_id: job.id.clone(),
            path,
            payload_hash: descriptor.payload_hash,
        })
    }

    /// Non-blocking poll for the worker's result.
    pub fn collect(&self, job_id: &str) -> Result<CollectOutcome, MissionctlError> {
        let path = self.result_path(job_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CollectOutcome::Pending);
            }
            Err(e) => return Err(MissionctlError::IoError(e)),
        };
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(CollectOutcome::Rejected {
                reason: "result file is not valid UTF-8".to_string(),
            });
        };
        Ok(match parse_result_text(&text) {
            Ok(value) => CollectOutcome::Ready(value),
            Err(reason) => CollectOutcome::Rejected { reason },
        })
    }

    /// Remove a consumed result file. Returns whether one was removed.
    pub fn acknowledge(&self, job_id: &str) -> Result<bool, MissionctlError> {
        let path = self.result_path(job_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MissionctlError::IoError(e)),
        }
    }

    pub fn read_descriptor(&self, job_id: &str) -> Result<JobDescriptor, MissionctlError> {
        let path = self.descriptor_path(job_id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MissionctlError::NotFound(format!(
                    "descriptor for job '{}'",
                    job_id
                )));
            }
            Err(e) => return Err(MissionctlError::IoError(e)),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn count_with_suffix(dir: &Path, suffix: &str) -> Result<usize, MissionctlError> {
        let mut count = 0;
        for entry in fs::read_dir(dir).map_err(MissionctlError::IoError)? {
            let entry = entry.map_err(MissionctlError::IoError)?;
            if entry.file_name().to_string_lossy().ends_with(suffix) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Descriptors currently in the outbound directory.
    pub fn outbound_count(&self) -> Result<usize, MissionctlError> {
        Self::count_with_suffix(&self.outbound, DESCRIPTOR_SUFFIX)
    }

    /// Result files waiting to be collected.
    pub fn inbound_count(&self) -> Result<usize, MissionctlError> {
        Self::count_with_suffix(&self.inbound, RESULT_SUFFIX)
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "queue",
        "version": "1.0.0",
        "description": "Filesystem job queue shared with the worker",
        "outbound": format!("<outbound_dir>/<job_id>{}", DESCRIPTOR_SUFFIX),
        "inbound": format!("<inbound_dir>/<job_id>{}", RESULT_SUFFIX),
        "descriptor": {
            "required": ["job_id", "kind", "session_id", "created_at", "depth", "payload_hash", "payload"],
            "payload": ["response_format", "mission", "task", "params"],
            "response_format": RESPONSE_FORMAT
        },
        "result": "a single JSON object in the action protocol; absence means pending"
    })
}

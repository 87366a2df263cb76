//! Job lifecycle orchestration: dispatch, sync, fail and wait.
//!
//! `Orchestrator` owns one store, one queue bridge, one workspace and the
//! lifecycle audit log. Every job transition refreshes the owning task's
//! status (a separate write, not atomic with the job update) and appends an
//! audit event.
//!
//! `sync`, `dispatch` and `fail_job` run under an exclusive per-job lock
//! (`<data_dir>/locks/<job_id>.lock`). Only the holder can commit `synced`
//! and interpret the result, so a second caller waits and then replays. A
//! crashed holder releases the lock with its process; the next `sync` resumes
//! interpretation in resuming mode.

use crate::core::audit::AuditLog;
use crate::core::config::{CONFIG_DIR, Config};
use crate::core::error::MissionctlError;
use crate::core::lock::{self, LockGuard, LockMode};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::interpreter::{EffectSummary, Interpreter, Limits};
use crate::plugins::missions::{self, Job, JobStatus, Mission, NewMission, NewTask, Params, Task};
use crate::plugins::protocol::{self, Action, ValidatedResponse};
use crate::plugins::queue::{self, CollectOutcome, DispatchHandle, QueueBridge};
use crate::plugins::workspace::Workspace;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";
/// Per-job lock files, under the data directory.
const JOB_LOCK_DIR: &str = "locks";

/// Result of one `sync` (or `wait`) call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// No result yet; the caller decides when to poll again.
    Pending { job: Job },
    /// Result committed and its effect applied.
    Synced {
        job: Job,
        effect: EffectSummary,
        dispatched: Vec<String>,
    },
    /// The job ended `failed` without the sync call itself erroring: the
    /// worker reported an error, or the effect could not be applied.
    Failed { job: Job, code: &'static str },
    /// The job was already settled; nothing was re-applied.
    Replayed { job: Job },
    /// `wait` gave up and marked the job failed.
    DeadlineExceeded { job: Job },
}

impl SyncOutcome {
    pub fn job(&self) -> &Job {
        match self {
            SyncOutcome::Pending { job }
            | SyncOutcome::Synced { job, .. }
            | SyncOutcome::Failed { job, .. }
            | SyncOutcome::Replayed { job }
            | SyncOutcome::DeadlineExceeded { job } => job,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Pending { .. } => "pending",
            SyncOutcome::Synced { .. } => "synced",
            SyncOutcome::Failed { .. } => "failed",
            SyncOutcome::Replayed { .. } => "replayed",
            SyncOutcome::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    pub fn to_json(&self) -> Result<Value, MissionctlError> {
        let mut out = json!({
            "outcome": self.label(),
            "job": serde_json::to_value(self.job())?,
        });
        match self {
            SyncOutcome::Synced {
                effect, dispatched, ..
            } => {
                out["effect"] = serde_json::to_value(effect)?;
                out["dispatched"] = json!(dispatched);
            }
            SyncOutcome::Failed { code, .. } => out["code"] = json!(code),
            _ => {}
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Config,
    store: Store,
    bridge: QueueBridge,
    workspace: Workspace,
    audit: AuditLog,
    job_locks: PathBuf,
}

impl Orchestrator {
    /// Open the project at `project_root` using its config file (or defaults).
    pub fn open(project_root: &Path) -> Result<Self, MissionctlError> {
        Self::from_config(Config::load(project_root)?)
    }

    /// Build from an already resolved config.
    pub fn from_config(config: Config) -> Result<Self, MissionctlError> {
        config.validate()?;
        let store = Store::open(&config.data_dir)?.with_lock_timeout(config.lock_timeout());
        let bridge = QueueBridge::from_config(&config)?;
        let workspace = Workspace::new(&config.workspace_root).with_protected(CONFIG_DIR);
        let audit = AuditLog::new(&config.data_dir);
        let job_locks = config.data_dir.join(JOB_LOCK_DIR);
        fs::create_dir_all(&job_locks).map_err(MissionctlError::IoError)?;
        Ok(Self {
            config,
            store,
            bridge,
            workspace,
            audit,
            job_locks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn bridge(&self) -> &QueueBridge {
        &self.bridge
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn create_mission(&self, new: NewMission) -> Result<Mission, MissionctlError> {
        let mission = missions::create_mission(&self.store, new)?;
        tracing::info!(mission_id = %mission.id, "mission created");
        Ok(mission)
    }

    pub fn create_task(&self, mission_id: &str, new: NewTask) -> Result<Task, MissionctlError> {
        let task = missions::create_task(&self.store, mission_id, new)?;
        tracing::info!(task_id = %task.id, mission_id, kind = %task.kind, "task created");
        Ok(task)
    }

    pub fn create_job(&self, task_id: &str, payload: Params) -> Result<Job, MissionctlError> {
        let job = missions::create_job(&self.store, task_id, payload)?;
        missions::refresh_task_status(&self.store, task_id)?;
        self.audit.record(
            "job.create",
            Some(&job.id),
            job.status.as_str(),
            json!({ "task_id": task_id }),
        );
        tracing::info!(job_id = %job.id, task_id, "job created");
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, MissionctlError> {
        missions::get_job(&self.store, job_id)
    }

    /// Exclusive claim on `job_id` for the duration of one lifecycle step.
    fn lock_job(&self, job_id: &str) -> Result<LockGuard, MissionctlError> {
        queue::validate_job_id(job_id)?;
        missions::get_job(&self.store, job_id)?;
        lock::acquire(
            &self.job_locks.join(format!("{}.lock", job_id)),
            &format!("job {}", job_id),
            LockMode::Exclusive,
            self.config.lock_timeout(),
        )
    }

    /// Publish the job's descriptor and move it to `dispatched`.
    ///
    /// A job already in flight gets the same descriptor rewritten; a settled
    /// job cannot be dispatched.
    pub fn dispatch(&self, job_id: &str) -> Result<DispatchHandle, MissionctlError> {
        let _claim = self.lock_job(job_id)?;
        let job = missions::get_job(&self.store, job_id)?;
        if job.status.is_settled() {
            return Err(MissionctlError::InvalidTransition {
                job_id: job.id,
                from: job.status.to_string(),
                to: JobStatus::Dispatched.to_string(),
            });
        }
        let task = missions::get_task(&self.store, &job.task_id)?;
        let mission = missions::get_mission(&self.store, &task.mission_id)?;
        let handle = self.bridge.dispatch(&mission, &task, &job)?;

        if job.status == JobStatus::Created {
            missions::transition_job(&self.store, job_id, JobStatus::Dispatched, |_| {})?;
            missions::refresh_task_status(&self.store, &task.id)?;
        }
        self.audit.record(
            "job.dispatch",
            Some(job_id),
            JobStatus::Dispatched.as_str(),
            json!({
                "path": handle.path.display().to_string(),
                "payload_hash": handle.payload_hash,
                "redispatch": job.status != JobStatus::Created,
            }),
        );
        tracing::info!(job_id, path = %handle.path.display(), "job dispatched");
        Ok(handle)
    }

    /// Poll the worker's result for `job_id` once and commit whatever it says.
    pub fn sync(&self, job_id: &str) -> Result<SyncOutcome, MissionctlError> {
        let _claim = self.lock_job(job_id)?;
        let job = missions::get_job(&self.store, job_id)?;
        match job.status {
            JobStatus::Failed => return Ok(SyncOutcome::Replayed { job }),
            JobStatus::Synced if job.effect.is_some() => return Ok(SyncOutcome::Replayed { job }),
            JobStatus::Synced => {
                tracing::info!(job_id, "resuming interpretation of synced job");
                let action = Self::recorded_action(&job)?;
                return self.interpret(job, &action, true);
            }
            JobStatus::Created => {
                return Err(MissionctlError::InvalidTransition {
                    job_id: job.id,
                    from: job.status.to_string(),
                    to: JobStatus::Synced.to_string(),
                });
            }
            JobStatus::Dispatched | JobStatus::AwaitingResult => {}
        }

        match self.bridge.collect(job_id)? {
            CollectOutcome::Pending => {
                let job = if job.status == JobStatus::Dispatched {
                    let job = missions::transition_job(
                        &self.store,
                        job_id,
                        JobStatus::AwaitingResult,
                        |_| {},
                    )?;
                    self.audit.record(
                        "job.await",
                        Some(job_id),
                        job.status.as_str(),
                        Value::Null,
                    );
                    job
                } else {
                    job
                };
                Ok(SyncOutcome::Pending { job })
            }
            CollectOutcome::Rejected { reason } => {
                let err = MissionctlError::QueueRejection {
                    job_id: job_id.to_string(),
                    reason,
                };
                self.fail_with(&job.id, &err)?;
                self.acknowledge(job_id)?;
                Err(err)
            }
            CollectOutcome::Ready(raw) => match protocol::validate(&raw) {
                Err(rejection) => {
                    let err: MissionctlError = rejection.into();
                    self.fail_with(&job.id, &err)?;
                    self.acknowledge(job_id)?;
                    Err(err)
                }
                Ok(ValidatedResponse::WorkerError { error }) => {
                    let record = ValidatedResponse::WorkerError {
                        error: error.clone(),
                    }
                    .to_record()?;
                    let cause = format!("worker error: {}", error);
                    let job = self.commit_failed(job_id, cause, Some(record))?;
                    self.acknowledge(job_id)?;
                    Ok(SyncOutcome::Failed {
                        job,
                        code: "WORKER_ERROR",
                    })
                }
                Ok(ValidatedResponse::Success(action)) => {
                    let record = ValidatedResponse::Success(action.clone()).to_record()?;
                    let job = match missions::transition_job(
                        &self.store,
                        job_id,
                        JobStatus::Synced,
                        |j| j.result = Some(record),
                    ) {
                        Ok(job) => job,
                        // A concurrent sync committed first.
                        Err(MissionctlError::InvalidTransition { .. }) => {
                            return Ok(SyncOutcome::Replayed {
                                job: missions::get_job(&self.store, job_id)?,
                            });
                        }
                        Err(e) => return Err(e),
                    };
                    missions::refresh_task_status(&self.store, &job.task_id)?;
                    self.audit.record(
                        "job.sync",
                        Some(job_id),
                        job.status.as_str(),
                        json!({ "action": action.name() }),
                    );
                    self.acknowledge(job_id)?;
                    self.interpret(job, &action, false)
                }
            },
        }
    }

    fn recorded_action(job: &Job) -> Result<Action, MissionctlError> {
        let record = job.result.clone().ok_or_else(|| {
            MissionctlError::ValidationError(format!(
                "synced job {} has no recorded result",
                job.id
            ))
        })?;
        match protocol::validate(&Value::Object(record))? {
            ValidatedResponse::Success(action) => Ok(action),
            ValidatedResponse::WorkerError { .. } => Err(MissionctlError::ValidationError(format!(
                "synced job {} carries a worker error result",
                job.id
            ))),
        }
    }

    fn interpret(
        &self,
        job: Job,
        action: &Action,
        resuming: bool,
    ) -> Result<SyncOutcome, MissionctlError> {
        let task = missions::get_task(&self.store, &job.task_id)?;
        let limits = Limits::from_config(&self.config);
        let interpreter =
            Interpreter::new(&self.store, &self.workspace, limits).resuming(resuming);
        let effect = match interpreter.apply(&task, &job, action) {
            Ok(effect) => effect,
            Err(
                err @ (MissionctlError::EffectFailure(_)
                | MissionctlError::FollowupLimitExceeded(_)),
            ) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %err,
                    "effect failed; job degraded to failed"
                );
                let job = self.fail_with(&job.id, &err)?;
                return Ok(SyncOutcome::Failed {
                    job,
                    code: err.code(),
                });
            }
            Err(e) => return Err(e),
        };

        let mut dispatched = Vec::new();
        if let EffectSummary::FollowupsCreated { task_ids, job_ids } = &effect {
            for task_id in task_ids {
                missions::refresh_task_status(&self.store, task_id)?;
            }
            self.audit.record(
                "job.followups",
                Some(&job.id),
                job.status.as_str(),
                json!({ "job_ids": job_ids, "task_ids": task_ids }),
            );
            if self.config.auto_dispatch_followups {
                for child_id in job_ids {
                    let child = missions::get_job(&self.store, child_id)?;
                    if child.status == JobStatus::Created {
                        self.dispatch(child_id)?;
                        dispatched.push(child_id.clone());
                    }
                }
            }
        }

        let recorded = effect.clone();
        let job = self.store.update::<Job, _>(&job.id, move |j| {
            if j.effect.is_none() {
                j.effect = Some(recorded);
                j.updated_at = time::now_epoch_z();
            }
            Ok(())
        })?;
        self.audit.record(
            "job.effect",
            Some(&job.id),
            job.status.as_str(),
            serde_json::to_value(&effect)?,
        );
        tracing::info!(job_id = %job.id, action = action.name(), "job synced");
        Ok(SyncOutcome::Synced {
            job,
            effect,
            dispatched,
        })
    }

    fn commit_failed(
        &self,
        job_id: &str,
        cause: String,
        result: Option<Params>,
    ) -> Result<Job, MissionctlError> {
        let detail = json!({ "error": cause });
        let job = missions::transition_job(&self.store, job_id, JobStatus::Failed, |j| {
            j.error = Some(cause);
            if j.result.is_none() {
                j.result = result;
            }
        })?;
        missions::refresh_task_status(&self.store, &job.task_id)?;
        self.audit
            .record("job.fail", Some(job_id), job.status.as_str(), detail);
        tracing::info!(job_id, error = ?job.error, "job failed");
        Ok(job)
    }

    fn fail_with(&self, job_id: &str, err: &MissionctlError) -> Result<Job, MissionctlError> {
        self.commit_failed(job_id, err.to_string(), None)
    }

    /// Caller-imposed failure (cancellation, deadline).
    pub fn fail_job(&self, job_id: &str, reason: &str) -> Result<Job, MissionctlError> {
        if reason.trim().is_empty() {
            return Err(MissionctlError::ValidationError(
                "failure reason cannot be empty".to_string(),
            ));
        }
        let _claim = self.lock_job(job_id)?;
        self.commit_failed(job_id, reason.to_string(), None)
    }

    fn acknowledge(&self, job_id: &str) -> Result<(), MissionctlError> {
        if !self.config.keep_results {
            self.bridge.acknowledge(job_id)?;
        }
        Ok(())
    }

    /// Poll `sync` every `interval` until the job leaves the pending states or
    /// `timeout` passes; on timeout the job is marked failed.
    pub fn wait(
        &self,
        job_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<SyncOutcome, MissionctlError> {
        let started = Instant::now();
        loop {
            let outcome = self.sync(job_id)?;
            if !matches!(outcome, SyncOutcome::Pending { .. }) {
                return Ok(outcome);
            }
            if started.elapsed() >= timeout {
                let job = self.fail_job(job_id, DEADLINE_EXCEEDED)?;
                return Ok(SyncOutcome::DeadlineExceeded { job });
            }
            std::thread::sleep(interval.min(timeout.saturating_sub(started.elapsed())));
        }
    }
}

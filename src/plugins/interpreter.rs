//! Action interpreter: turns a validated worker action into its effect.
//!
//! | action                 | effect                                        |
//! |------------------------|-----------------------------------------------|
//! | `list_files_result`    | recorded on the job, no new jobs              |
//! | `analysis_result`      | recorded on the job, no new jobs              |
//! | `write_file`           | file written under the workspace root         |
//! | `patch_file`           | unified diff applied under the workspace root |
//! | `create_followup_jobs` | one job per entry, under a reused/new task    |
//!
//! Follow-ups reuse the mission's task whose name equals the entry's `task`,
//! or create one (`name = kind = task`). New task and job ids are derived from
//! their inputs and inserted with insert-if-absent, so interpreting the same
//! job twice lands on the records the first pass created.
//!
//! Loop guards are checked before anything is written: the child depth must
//! not exceed `max_followup_depth`, and the mission's outstanding jobs plus
//! the new ones must not exceed `max_outstanding_jobs`.

use crate::core::config::Config;
use crate::core::error::MissionctlError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::missions::{self, Job, Task, TaskKind, TaskStatus};
use crate::plugins::protocol::{Action, FollowupSpec};
use crate::plugins::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What applying an action did; stored on the job as `effect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectSummary {
    FilesRecorded {
        count: usize,
    },
    AnalysisRecorded {
        target_file: String,
        issues: usize,
        recommendations: usize,
    },
    FileWritten {
        file: String,
        bytes: usize,
        created: bool,
    },
    FilePatched {
        file: String,
        bytes: usize,
        hunks_applied: usize,
    },
    FollowupsCreated {
        /// Task of each new job, parallel to `job_ids`.
        task_ids: Vec<String>,
        job_ids: Vec<String>,
    },
}

impl EffectSummary {
    pub fn kind(&self) -> &'static str {
        match self {
            EffectSummary::FilesRecorded { .. } => "files_recorded",
            EffectSummary::AnalysisRecorded { .. } => "analysis_recorded",
            EffectSummary::FileWritten { .. } => "file_written",
            EffectSummary::FilePatched { .. } => "file_patched",
            EffectSummary::FollowupsCreated { .. } => "followups_created",
        }
    }

    pub fn spawned_job_ids(&self) -> &[String] {
        match self {
            EffectSummary::FollowupsCreated { job_ids, .. } => job_ids,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_followup_depth: u32,
    pub max_outstanding_jobs: usize,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_followup_depth: config.max_followup_depth,
            max_outstanding_jobs: config.max_outstanding_jobs,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Interpreter<'a> {
    store: &'a Store,
    workspace: &'a Workspace,
    limits: Limits,
    resuming: bool,
}

/// Deterministic id of the `index`-th follow-up spawned by `parent_job_id`.
pub fn followup_job_id(parent_job_id: &str, index: usize) -> String {
    time::derived_record_id("job", &[parent_job_id, &index.to_string()])
}

/// Deterministic id of the follow-up task `name` in `mission_id`.
pub fn followup_task_id(mission_id: &str, name: &str) -> String {
    time::derived_record_id("task", &[mission_id, name])
}

impl<'a> Interpreter<'a> {
    pub fn new(store: &'a Store, workspace: &'a Workspace, limits: Limits) -> Self {
        Self {
            store,
            workspace,
            limits,
            resuming: false,
        }
    }

    /// Interpretation of a job whose effect may already be partly on disk.
    /// Follow-ups and writes are naturally repeatable; patches accept a file
    /// that already holds their post-image.
    pub fn resuming(mut self, resuming: bool) -> Self {
        self.resuming = resuming;
        self
    }

    /// Apply `action`, produced by `job` of `task`.
    pub fn apply(
        &self,
        task: &Task,
        job: &Job,
        action: &Action,
    ) -> Result<EffectSummary, MissionctlError> {
        match action {
            Action::ListFilesResult { files } => Ok(EffectSummary::FilesRecorded {
                count: files.len(),
            }),
            Action::AnalysisResult {
                target_file,
                issues,
                recommendations,
                ..
            } => Ok(EffectSummary::AnalysisRecorded {
                target_file: target_file.clone(),
                issues: issues.len(),
                recommendations: recommendations.len(),
            }),
            Action::WriteFile { file, content } => {
                let out = self.workspace.write_file(file, content)?;
                Ok(EffectSummary::FileWritten {
                    file: out.file,
                    bytes: out.bytes,
                    created: out.created,
                })
            }
            Action::PatchFile { file, patch } => {
                let out = if self.resuming {
                    self.workspace.reapply_patch(file, patch)?
                } else {
                    self.workspace.patch_file(file, patch)?
                };
                Ok(EffectSummary::FilePatched {
                    file: out.file,
                    bytes: out.bytes,
                    hunks_applied: out.hunks_applied,
                })
            }
            Action::CreateFollowupJobs { new_jobs } => self.spawn_followups(task, job, new_jobs),
        }
    }

    fn check_limits(
        &self,
        task: &Task,
        job: &Job,
        job_ids: &[String],
    ) -> Result<(), MissionctlError> {
        let child_depth = job.depth + 1;
        if child_depth > self.limits.max_followup_depth {
            return Err(MissionctlError::FollowupLimitExceeded(format!(
                "job {} at depth {} cannot spawn follow-ups (max_followup_depth = {})",
                job.id, job.depth, self.limits.max_followup_depth
            )));
        }

        let existing: HashSet<String> = missions::list_jobs(self.store, None)?
            .into_iter()
            .map(|j| j.id)
            .collect();
        let fresh = job_ids.iter().filter(|id| !existing.contains(*id)).count();
        let outstanding = missions::outstanding_jobs(self.store, &task.mission_id)?;
        if outstanding + fresh > self.limits.max_outstanding_jobs {
            return Err(MissionctlError::FollowupLimitExceeded(format!(
                "mission {} has {} outstanding jobs; {} more would exceed max_outstanding_jobs = {}",
                task.mission_id, outstanding, fresh, self.limits.max_outstanding_jobs
            )));
        }
        Ok(())
    }

    fn resolve_task(&self, mission_id: &str, name: &str) -> Result<Task, MissionctlError> {
        if let Some(existing) = missions::find_task_by_name(self.store, mission_id, name)? {
            return Ok(existing);
        }
        let ts = time::now_epoch_z();
        let task = Task {
            id: followup_task_id(mission_id, name),
            mission_id: mission_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            kind: TaskKind::parse(name)?,
            params: Default::default(),
            status: TaskStatus::Pending,
            created_at: ts.clone(),
            updated_at: ts,
        };
        let (task, inserted) = self.store.insert_if_absent(task)?;
        if inserted {
            tracing::info!(task_id = %task.id, mission_id, name, "created follow-up task");
        }
        Ok(task)
    }

    fn spawn_followups(
        &self,
        task: &Task,
        job: &Job,
        specs: &[FollowupSpec],
    ) -> Result<EffectSummary, MissionctlError> {
        let job_ids: Vec<String> = (0..specs.len())
            .map(|i| followup_job_id(&job.id, i))
            .collect();
        if specs.is_empty() {
            return Ok(EffectSummary::FollowupsCreated {
                task_ids: Vec::new(),
                job_ids,
            });
        }

        self.check_limits(task, job, &job_ids)?;
        // Kinds are checked up front so a bad entry cannot leave a partial batch.
        for (i, spec) in specs.iter().enumerate() {
            TaskKind::parse(&spec.task).map_err(|e| {
                MissionctlError::EffectFailure(format!("new_jobs[{}].task: {}", i, e))
            })?;
        }

        let mut task_ids = Vec::with_capacity(specs.len());
        for (spec, job_id) in specs.iter().zip(&job_ids) {
            let target = self.resolve_task(&task.mission_id, &spec.task)?;
            let mut child = missions::new_job(job_id.clone(), &target.id, spec.params.clone());
            child.depth = job.depth + 1;
            child.parent_job_id = Some(job.id.clone());
            let (child, inserted) = self.store.insert_if_absent(child)?;
            if inserted {
                tracing::info!(
                    job_id = %child.id,
                    parent_job_id = %job.id,
                    task_id = %target.id,
                    depth = child.depth,
                    "created follow-up job"
                );
            }
            task_ids.push(target.id);
        }
        Ok(EffectSummary::FollowupsCreated { task_ids, job_ids })
    }
}

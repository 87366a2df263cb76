//! Read-only status aggregate over the store and the queue directories.

use crate::core::error::MissionctlError;
use crate::plugins::lifecycle::Orchestrator;
use crate::plugins::missions::{Job, JobStatus, Mission, Task};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    pub missions: usize,
    pub tasks: usize,
    pub jobs: usize,
    /// Every job status, including zero counts.
    pub jobs_by_status: BTreeMap<String, usize>,
    pub outbound_pending: usize,
    pub inbound_ready: usize,
}

pub fn count_by_status(jobs: &[Job]) -> BTreeMap<String, usize> {
    let mut counts: FxHashMap<JobStatus, usize> = FxHashMap::default();
    for job in jobs {
        *counts.entry(job.status).or_insert(0) += 1;
    }
    JobStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
        .collect()
}

pub fn status(orch: &Orchestrator) -> Result<StatusReport, MissionctlError> {
    let store = orch.store();
    let missions: Vec<Mission> = store.list()?;
    let tasks: Vec<Task> = store.list()?;
    let jobs: Vec<Job> = store.list()?;
    Ok(StatusReport {
        status: "ok".to_string(),
        missions: missions.len(),
        tasks: tasks.len(),
        jobs: jobs.len(),
        jobs_by_status: count_by_status(&jobs),
        outbound_pending: orch.bridge().outbound_count()?,
        inbound_ready: orch.bridge().inbound_count()?,
    })
}

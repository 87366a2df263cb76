//! Missions, tasks and jobs: the record types and their store operations.
//!
//! Referential integrity (job → task → mission) is checked when a record is
//! created and not re-verified on read. Records are never deleted; jobs move
//! through their state machine via [`transition_job`].

use crate::core::error::MissionctlError;
use crate::core::store::{Collection, Record, Store};
use crate::core::time;
use crate::plugins::interpreter::EffectSummary;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Open key-value map used for metadata, params and payloads.
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Params,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

impl Record for Mission {
    const COLLECTION: Collection = Collection::Missions;
    fn id(&self) -> &str {
        &self.id
    }
}

/// Kind of work a task spawns jobs for. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ListFiles,
    LlmCall,
    CodeTask,
    WriteModule,
    Custom(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::ListFiles => "list_files",
            TaskKind::LlmCall => "llm_call",
            TaskKind::CodeTask => "code_task",
            TaskKind::WriteModule => "write_module",
            TaskKind::Custom(name) => name,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MissionctlError> {
        let raw = raw.trim();
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(MissionctlError::ValidationError(format!(
                "invalid task kind '{}': allowed characters are [A-Za-z0-9_.-]",
                raw
            )));
        }
        Ok(match raw {
            "list_files" => TaskKind::ListFiles,
            "llm_call" => TaskKind::LlmCall,
            "code_task" => TaskKind::CodeTask,
            "write_module" => TaskKind::WriteModule,
            other => TaskKind::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TaskKind::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub mission_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub params: Params,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Record for Task {
    const COLLECTION: Collection = Collection::Tasks;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Dispatched,
    AwaitingResult,
    Synced,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Created,
        JobStatus::Dispatched,
        JobStatus::AwaitingResult,
        JobStatus::Synced,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Dispatched => "dispatched",
            JobStatus::AwaitingResult => "awaiting_result",
            JobStatus::Synced => "synced",
            JobStatus::Failed => "failed",
        }
    }

    /// No further worker interaction is expected.
    pub fn is_settled(self) -> bool {
        matches!(self, JobStatus::Synced | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Created, Dispatched)
                | (Created, Failed)
                | (Dispatched, AwaitingResult)
                | (Dispatched, Synced)
                | (Dispatched, Failed)
                | (AwaitingResult, Synced)
                | (AwaitingResult, Failed)
                | (Synced, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub payload: Params,
    pub status: JobStatus,
    /// Validated worker response, set once on entering `synced` (or the
    /// worker's error shape on entering `failed`).
    #[serde(default)]
    pub result: Option<Params>,
    /// Outcome recorded by the action interpreter.
    #[serde(default)]
    pub effect: Option<EffectSummary>,
    /// Failure cause, set once on entering `failed`.
    #[serde(default)]
    pub error: Option<String>,
    /// 0 for client-created jobs, parent depth + 1 for follow-ups.
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub parent_job_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub dispatched_at: Option<String>,
    #[serde(default)]
    pub synced_at: Option<String>,
}

impl Record for Job {
    const COLLECTION: Collection = Collection::Jobs;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Empty,
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct NewMission {
    pub title: String,
    pub description: String,
    pub metadata: Params,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub kind: TaskKind,
    pub params: Params,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), MissionctlError> {
    if value.trim().is_empty() {
        return Err(MissionctlError::ValidationError(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

pub fn create_mission(store: &Store, new: NewMission) -> Result<Mission, MissionctlError> {
    require_non_empty("title", &new.title)?;
    let mission = Mission {
        id: time::new_record_id("mission"),
        title: new.title,
        description: new.description,
        metadata: new.metadata,
        tags: new.tags,
        created_at: time::now_epoch_z(),
    };
    store.append(&mission)?;
    Ok(mission)
}

pub fn create_task(store: &Store, mission_id: &str, new: NewTask) -> Result<Task, MissionctlError> {
    require_non_empty("name", &new.name)?;
    let mission: Mission = store.get(mission_id)?;
    let ts = time::now_epoch_z();
    let task = Task {
        id: time::new_record_id("task"),
        mission_id: mission.id,
        name: new.name,
        description: new.description,
        kind: new.kind,
        params: new.params,
        status: TaskStatus::Pending,
        created_at: ts.clone(),
        updated_at: ts,
    };
    store.append(&task)?;
    Ok(task)
}

/// Job skeleton in `created` state; callers decide id, depth and parent.
pub fn new_job(id: String, task_id: &str, payload: Params) -> Job {
    let ts = time::now_epoch_z();
    Job {
        id,
        task_id: task_id.to_string(),
        payload,
        status: JobStatus::Created,
        result: None,
        effect: None,
        error: None,
        depth: 0,
        parent_job_id: None,
        created_at: ts.clone(),
        updated_at: ts,
        dispatched_at: None,
        synced_at: None,
    }
}

pub fn create_job(store: &Store, task_id: &str, payload: Params) -> Result<Job, MissionctlError> {
    let task: Task = store.get(task_id)?;
    let job = new_job(time::new_record_id("job"), &task.id, payload);
    store.append(&job)?;
    Ok(job)
}

pub fn get_mission(store: &Store, id: &str) -> Result<Mission, MissionctlError> {
    store.get(id)
}

pub fn get_task(store: &Store, id: &str) -> Result<Task, MissionctlError> {
    store.get(id)
}

pub fn get_job(store: &Store, id: &str) -> Result<Job, MissionctlError> {
    store.get(id)
}

pub fn list_missions(store: &Store) -> Result<Vec<Mission>, MissionctlError> {
    store.list()
}

pub fn list_tasks(store: &Store, mission_id: Option<&str>) -> Result<Vec<Task>, MissionctlError> {
    let tasks: Vec<Task> = store.list()?;
    Ok(match mission_id {
        Some(mid) => tasks.into_iter().filter(|t| t.mission_id == mid).collect(),
        None => tasks,
    })
}

pub fn list_jobs(store: &Store, task_id: Option<&str>) -> Result<Vec<Job>, MissionctlError> {
    let jobs: Vec<Job> = store.list()?;
    Ok(match task_id {
        Some(tid) => jobs.into_iter().filter(|j| j.task_id == tid).collect(),
        None => jobs,
    })
}

/// First task of `mission_id` named `name`, in insertion order.
pub fn find_task_by_name(
    store: &Store,
    mission_id: &str,
    name: &str,
) -> Result<Option<Task>, MissionctlError> {
    Ok(list_tasks(store, Some(mission_id))?
        .into_iter()
        .find(|t| t.name == name))
}

/// Jobs of `mission_id` that are not yet settled.
pub fn outstanding_jobs(store: &Store, mission_id: &str) -> Result<usize, MissionctlError> {
    let task_ids: Vec<String> = list_tasks(store, Some(mission_id))?
        .into_iter()
        .map(|t| t.id)
        .collect();
    let jobs: Vec<Job> = store.list()?;
    Ok(jobs
        .iter()
        .filter(|j| !j.status.is_settled() && task_ids.iter().any(|t| *t == j.task_id))
        .count())
}

/// Move `job_id` to `to`, applying `fill` to the record in the same write.
///
/// The state machine is checked against the stored status under the
/// collection lock, so two racing transitions cannot both succeed.
pub fn transition_job<F>(
    store: &Store,
    job_id: &str,
    to: JobStatus,
    fill: F,
) -> Result<Job, MissionctlError>
where
    F: FnOnce(&mut Job),
{
    store.update::<Job, _>(job_id, |job| {
        if !job.status.can_transition_to(to) {
            return Err(MissionctlError::InvalidTransition {
                job_id: job.id.clone(),
                from: job.status.to_string(),
                to: to.to_string(),
            });
        }
        let ts = time::now_epoch_z();
        match to {
            JobStatus::Dispatched => job.dispatched_at = Some(ts.clone()),
            JobStatus::Synced => job.synced_at = Some(ts.clone()),
            _ => {}
        }
        job.status = to;
        job.updated_at = ts;
        fill(job);
        Ok(())
    })
}

pub fn task_status_from_jobs(jobs: &[Job]) -> TaskStatus {
    if jobs.is_empty() {
        return TaskStatus::Pending;
    }
    if jobs.iter().any(|j| j.status == JobStatus::Failed) {
        TaskStatus::Failed
    } else if jobs.iter().all(|j| j.status == JobStatus::Synced) {
        TaskStatus::Completed
    } else if jobs.iter().any(|j| j.status != JobStatus::Created) {
        TaskStatus::Active
    } else {
        TaskStatus::Pending
    }
}

/// Recompute a task's status from its jobs. Not atomic with the job update
/// that prompted it.
pub fn refresh_task_status(store: &Store, task_id: &str) -> Result<Task, MissionctlError> {
    let jobs = list_jobs(store, Some(task_id))?;
    let status = task_status_from_jobs(&jobs);
    store.update::<Task, _>(task_id, |task| {
        if task.status != status {
            task.status = status;
            task.updated_at = time::now_epoch_z();
        }
        Ok(())
    })
}

pub fn mission_status_from_tasks(tasks: &[Task]) -> MissionStatus {
    if tasks.is_empty() {
        return MissionStatus::Empty;
    }
    if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        MissionStatus::Failed
    } else if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
        MissionStatus::Completed
    } else if tasks
        .iter()
        .any(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Completed))
    {
        MissionStatus::Active
    } else {
        MissionStatus::Pending
    }
}

pub fn mission_status(store: &Store, mission_id: &str) -> Result<MissionStatus, MissionctlError> {
    let _: Mission = store.get(mission_id)?;
    Ok(mission_status_from_tasks(&list_tasks(store, Some(mission_id))?))
}

/// Parse a CLI/JSON argument into an open map; empty input is an empty map.
pub fn parse_params(raw: &str) -> Result<Params, MissionctlError> {
    if raw.trim().is_empty() {
        return Ok(Params::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(MissionctlError::ValidationError(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

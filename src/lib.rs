//! missionctl: a local mission/task/job orchestrator for an external worker.
//!
//! Clients create a **mission**, typed **tasks** under it and **jobs** under
//! those. A job is dispatched by writing a descriptor into an outbound queue
//! directory; an external worker answers by dropping a result file into an
//! inbound directory. Syncing the job validates the answer against a closed
//! action protocol and applies it: recording results, writing or patching
//! files in the workspace, or spawning follow-up jobs, which re-enter the same
//! loop under depth and outstanding-job guards.
//!
//! # Architecture
//!
//! - `core::store`: line-delimited JSON collections (`missions`, `tasks`,
//!   `jobs`) behind collection-scoped advisory file locks.
//! - `plugins::protocol`: pure validator for worker responses.
//! - `plugins::queue`: the filesystem bridge (`dispatch` / `collect`).
//! - `plugins::interpreter`: applies validated actions.
//! - `plugins::lifecycle`: the `Orchestrator` that drives jobs through
//!   `created → dispatched → awaiting_result → synced | failed`.
//!
//! All state lives under `<root>/.missionctl/`:
//!
//! ```text
//! .missionctl/
//!   config.toml
//!   data/{missions,tasks,jobs}.jsonl
//!   data/lifecycle.events.jsonl
//!   queue/out/<job_id>.job.json
//!   queue/in/<job_id>.result.json
//! ```
//!
//! # Examples
//!
//! ```bash
//! missionctl init
//! missionctl mission create --title "Refactor parser"
//! missionctl task create --mission-id <id> --name scan --kind list_files
//! missionctl job create --task-id <id> --payload '{"path":"src"}'
//! missionctl job dispatch --id <job_id>
//! missionctl job wait --id <job_id> --timeout-secs 120
//! ```

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command, JobCommand, MissionCommand, OutputFormat, TaskCommand};
use crate::core::config::{CONFIG_DIR, Config};
use crate::core::error::MissionctlError;
use crate::core::output;
use crate::core::store::write_atomic;
use crate::core::time;
use crate::plugins::lifecycle::{Orchestrator, SyncOutcome};
use crate::plugins::missions::{self, Mission, NewMission, NewTask, TaskKind};
use crate::plugins::{health, protocol, queue};
use clap::Parser;
use colored::Colorize;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;

struct Emitter {
    format: OutputFormat,
}

impl Emitter {
    /// Print `body` in the command envelope, or `lines` for text output.
    fn emit(&self, cmd: &str, body: Value, lines: Vec<String>) -> Result<(), MissionctlError> {
        match self.format {
            OutputFormat::Json => {
                let envelope = time::command_envelope(cmd, "ok", body);
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
            OutputFormat::Text => {
                for line in lines {
                    println!("{}", line);
                }
            }
        }
        Ok(())
    }
}

fn mission_view(orch: &Orchestrator, mission: &Mission) -> Result<Value, MissionctlError> {
    let status = missions::mission_status(orch.store(), &mission.id)?;
    let mut view = serde_json::to_value(mission)?;
    view["status"] = serde_json::to_value(status)?;
    Ok(view)
}

fn status_str(value: &Value) -> String {
    value
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn sync_line(outcome: &SyncOutcome) -> String {
    let job = outcome.job();
    let detail = match outcome {
        SyncOutcome::Synced {
            effect, dispatched, ..
        } => {
            if dispatched.is_empty() {
                effect.kind().to_string()
            } else {
                format!("{} (dispatched {})", effect.kind(), dispatched.join(", "))
            }
        }
        _ => job.error.clone().unwrap_or_default(),
    };
    output::row(&job.id, outcome.label(), &detail)
}

fn init(root: &Path, force: bool, out: &Emitter) -> Result<(), MissionctlError> {
    let config_path = Config::config_path(root);
    let existed = config_path.exists();
    if !existed || force {
        std::fs::create_dir_all(root.join(CONFIG_DIR)).map_err(MissionctlError::IoError)?;
        write_atomic(&config_path, Config::default_toml()?.as_bytes())?;
    }
    let orch = Orchestrator::open(root)?;
    let config = orch.config();
    out.emit(
        "init",
        json!({
            "config_path": config_path.display().to_string(),
            "config_written": !existed || force,
            "data_dir": config.data_dir.display().to_string(),
            "outbound_dir": config.outbound_dir.display().to_string(),
            "inbound_dir": config.inbound_dir.display().to_string(),
        }),
        vec![
            format!(
                "  {} initialized {}",
                "●".bright_green(),
                root.display().to_string().bright_white()
            ),
            format!("    config   {}", config_path.display()),
            format!("    data     {}", config.data_dir.display()),
            format!("    outbound {}", config.outbound_dir.display()),
            format!("    inbound  {}", config.inbound_dir.display()),
        ],
    )
}

fn run_mission(
    orch: &Orchestrator,
    cmd: MissionCommand,
    out: &Emitter,
) -> Result<(), MissionctlError> {
    match cmd {
        MissionCommand::Create {
            title,
            description,
            metadata,
            tags,
        } => {
            let mission = orch.create_mission(NewMission {
                title,
                description,
                metadata: missions::parse_params(&metadata)?,
                tags: tags.into_iter().filter(|t| !t.trim().is_empty()).collect(),
            })?;
            let view = mission_view(orch, &mission)?;
            let line = output::row(&mission.id, &status_str(&view), &mission.title);
            out.emit("mission.create", json!({ "mission": view }), vec![line])
        }
        MissionCommand::List => {
            let mut views = Vec::new();
            let mut lines = Vec::new();
            for mission in missions::list_missions(orch.store())? {
                let view = mission_view(orch, &mission)?;
                lines.push(output::row(&mission.id, &status_str(&view), &mission.title));
                views.push(view);
            }
            out.emit("mission.list", json!({ "missions": views }), lines)
        }
        MissionCommand::Get { id } => {
            let mission = missions::get_mission(orch.store(), &id)?;
            let view = mission_view(orch, &mission)?;
            let line = output::row(&mission.id, &status_str(&view), &mission.title);
            out.emit("mission.get", json!({ "mission": view }), vec![line])
        }
    }
}

fn run_task(orch: &Orchestrator, cmd: TaskCommand, out: &Emitter) -> Result<(), MissionctlError> {
    match cmd {
        TaskCommand::Create {
            mission_id,
            name,
            kind,
            description,
            params,
        } => {
            let task = orch.create_task(
                &mission_id,
                NewTask {
                    name,
                    description,
                    kind: TaskKind::parse(&kind)?,
                    params: missions::parse_params(&params)?,
                },
            )?;
            let view = serde_json::to_value(&task)?;
            let line = output::row(&task.id, &status_str(&view), &task.name);
            out.emit("task.create", json!({ "task": view }), vec![line])
        }
        TaskCommand::List { mission_id } => {
            let tasks = missions::list_tasks(orch.store(), mission_id.as_deref())?;
            let mut lines = Vec::new();
            for task in &tasks {
                let view = serde_json::to_value(task)?;
                lines.push(output::row(
                    &task.id,
                    &status_str(&view),
                    &format!("{} [{}]", task.name, task.kind),
                ));
            }
            out.emit("task.list", json!({ "tasks": tasks }), lines)
        }
        TaskCommand::Get { id } => {
            let task = missions::get_task(orch.store(), &id)?;
            let view = serde_json::to_value(&task)?;
            let line = output::row(&task.id, &status_str(&view), &task.name);
            out.emit("task.get", json!({ "task": view }), vec![line])
        }
    }
}

fn run_job(orch: &Orchestrator, cmd: JobCommand, out: &Emitter) -> Result<(), MissionctlError> {
    match cmd {
        JobCommand::Create { task_id, payload } => {
            let job = orch.create_job(&task_id, missions::parse_params(&payload)?)?;
            let line = output::row(&job.id, job.status.as_str(), &job.task_id);
            out.emit("job.create", json!({ "job": job }), vec![line])
        }
        JobCommand::List { task_id } => {
            let jobs = missions::list_jobs(orch.store(), task_id.as_deref())?;
            let lines = jobs
                .iter()
                .map(|j| {
                    output::row(
                        &j.id,
                        j.status.as_str(),
                        j.error.as_deref().unwrap_or(&j.task_id),
                    )
                })
                .collect();
            out.emit("job.list", json!({ "jobs": jobs }), lines)
        }
        JobCommand::Get { id } => {
            let job = orch.get_job(&id)?;
            let line = output::row(
                &job.id,
                job.status.as_str(),
                job.error.as_deref().unwrap_or(&job.task_id),
            );
            out.emit("job.get", json!({ "job": job }), vec![line])
        }
        JobCommand::Dispatch { id } => {
            let handle = orch.dispatch(&id)?;
            let path = handle.path.display().to_string();
            out.emit(
                "job.dispatch",
                json!({
                    "job_id": handle.job_id,
                    "path": path,
                    "payload_hash": handle.payload_hash,
                }),
                vec![output::row(&handle.job_id, "dispatched", &path)],
            )
        }
        JobCommand::Sync { id } => {
            let outcome = orch.sync(&id)?;
            out.emit("job.sync", outcome.to_json()?, vec![sync_line(&outcome)])
        }
        JobCommand::Wait {
            id,
            timeout_secs,
            interval_ms,
        } => {
            let outcome = orch.wait(
                &id,
                Duration::from_secs(timeout_secs),
                Duration::from_millis(interval_ms.max(1)),
            )?;
            out.emit("job.wait", outcome.to_json()?, vec![sync_line(&outcome)])
        }
        JobCommand::Fail { id, reason } => {
            let job = orch.fail_job(&id, &reason)?;
            let line = output::row(&job.id, job.status.as_str(), &reason);
            out.emit("job.fail", json!({ "job": job }), vec![line])
        }
    }
}

pub fn run() -> Result<(), MissionctlError> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let out = Emitter { format: cli.format };

    match cli.command {
        Command::Init { force } => init(&root, force, &out),
        Command::Schema => out.emit(
            "schema",
            json!({ "protocol": protocol::schema(), "queue": queue::schema() }),
            vec![
                format!("  actions: {}", protocol::ACTIONS.join(", ")),
                format!("  descriptor: <outbound_dir>/<job_id>{}", queue::DESCRIPTOR_SUFFIX),
                format!("  result:     <inbound_dir>/<job_id>{}", queue::RESULT_SUFFIX),
            ],
        ),
        Command::Status => {
            let orch = Orchestrator::open(&root)?;
            let report = health::status(&orch)?;
            let mut lines = vec![format!(
                "  {} missions={} tasks={} jobs={} outbound={} inbound={}",
                output::status_badge(&report.status),
                report.missions,
                report.tasks,
                report.jobs,
                report.outbound_pending,
                report.inbound_ready
            )];
            for (status, count) in &report.jobs_by_status {
                lines.push(format!("    {:<16} {}", status, count));
            }
            out.emit("status", serde_json::to_value(&report)?, lines)
        }
        Command::Mission(m) => run_mission(&Orchestrator::open(&root)?, m.command, &out),
        Command::Task(t) => run_task(&Orchestrator::open(&root)?, t.command, &out),
        Command::Job(j) => run_job(&Orchestrator::open(&root)?, j.command, &out),
    }
}

//! CLI struct definitions for the missionctl command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "missionctl",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mission/task/job orchestrator that hands jobs to an external worker through a filesystem queue and acts on its structured replies."
)]
pub(crate) struct Cli {
    /// Project root holding `.missionctl/` (defaults to current working directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Output format.
    #[clap(long, value_enum, global = true, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Write a default `.missionctl/config.toml` and create the data and queue directories
    Init {
        /// Overwrite an existing config file.
        #[clap(long)]
        force: bool,
    },
    /// Manage missions
    Mission(MissionCli),
    /// Manage tasks
    Task(TaskCli),
    /// Manage and drive jobs
    Job(JobCli),
    /// Show store and queue counts
    Status,
    /// Print the protocol and queue schemas
    Schema,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MissionCli {
    #[clap(subcommand)]
    pub command: MissionCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum MissionCommand {
    /// Create a mission
    Create {
        #[clap(long)]
        title: String,
        #[clap(long, default_value = "")]
        description: String,
        /// Metadata as a JSON object.
        #[clap(long, default_value = "")]
        metadata: String,
        /// Tags (repeatable and/or comma-separated).
        #[clap(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// List missions with their derived status
    List,
    /// Get one mission
    Get {
        #[clap(long)]
        id: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TaskCommand {
    /// Create a task under a mission
    Create {
        #[clap(long)]
        mission_id: String,
        #[clap(long)]
        name: String,
        /// Task kind, e.g. list_files, llm_call, code_task, write_module.
        #[clap(long)]
        kind: String,
        #[clap(long, default_value = "")]
        description: String,
        /// Params as a JSON object.
        #[clap(long, default_value = "")]
        params: String,
    },
    /// List tasks
    List {
        #[clap(long)]
        mission_id: Option<String>,
    },
    /// Get one task
    Get {
        #[clap(long)]
        id: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct JobCli {
    #[clap(subcommand)]
    pub command: JobCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum JobCommand {
    /// Create a job under a task
    Create {
        #[clap(long)]
        task_id: String,
        /// Payload as a JSON object.
        #[clap(long, default_value = "")]
        payload: String,
    },
    /// List jobs
    List {
        #[clap(long)]
        task_id: Option<String>,
    },
    /// Get one job
    Get {
        #[clap(long)]
        id: String,
    },
    /// Write the job descriptor to the outbound queue
    Dispatch {
        #[clap(long)]
        id: String,
    },
    /// Poll once for the worker's result and apply it
    Sync {
        #[clap(long)]
        id: String,
    },
    /// Poll until the job settles or the deadline passes (then fail it)
    Wait {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "60")]
        timeout_secs: u64,
        #[clap(long, default_value = "500")]
        interval_ms: u64,
    },
    /// Mark a job failed
    Fail {
        #[clap(long)]
        id: String,
        #[clap(long)]
        reason: String,
    },
}

//! arbord — the Arbor control-plane CLI.
//!
//! Drives generic tasks against a local task store:
//! - Create tasks from a launch config or by forking another task
//! - Kill, pause, and unpause task trees
//! - Change job priorities
//! - Record allocation exits and inspect task trees
//!
//! # Usage
//!
//! ```text
//! arbord init-config --data-dir /var/lib/arbor > arbor.toml
//! arbord --config arbor.toml create --config-file task.toml
//! arbord --config arbor.toml pause <task-id>
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use arbor_core::{AllocationId, ArborConfig, JobId, TaskId};

mod commands;
mod local_rm;

#[derive(Parser)]
#[command(name = "arbord", about = "Arbor generic-task control plane", version)]
struct Cli {
    /// Path to arbor.toml. Built-in defaults are used when it does not exist.
    #[arg(long, global = true, default_value = "arbor.toml")]
    config: PathBuf,

    /// Override the task store path from the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// User the operation runs as.
    #[arg(long, global = true, default_value = "admin")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print an arbor.toml scaffold.
    InitConfig {
        /// Data directory the task store lives in.
        #[arg(long, default_value = "/var/lib/arbor")]
        data_dir: PathBuf,
    },
    /// Create a generic task and start its first allocation.
    Create {
        /// Launch config file (.json or .toml).
        #[arg(long)]
        config_file: Option<PathBuf>,
        /// Seed the launch config from an existing task.
        #[arg(long)]
        fork: Option<String>,
        /// Parent task.
        #[arg(long)]
        parent: Option<String>,
        /// Mark the task as pausable (false) or not (true).
        #[arg(long)]
        no_pause: Option<bool>,
        /// Directory shipped alongside the task.
        #[arg(long)]
        context_dir: Option<PathBuf>,
        /// Project the task belongs to.
        #[arg(long)]
        project: Option<String>,
    },
    /// Kill a task and its descendants.
    Kill {
        task_id: String,
        /// Kill the whole tree the task belongs to.
        #[arg(long)]
        from_root: bool,
    },
    /// Pause a task.
    Pause { task_id: String },
    /// Resume a paused task on a new allocation.
    Unpause { task_id: String },
    /// Change a job's scheduling priority.
    SetPriority { job_id: String, priority: i32 },
    /// Print the tree a task belongs to.
    Show { task_id: String },
    /// Record that an allocation stopped.
    ReportExit {
        /// Allocation id, `<task-id>.<specifier>`.
        allocation_id: AllocationId,
        #[arg(long, value_enum, default_value = "succeeded")]
        reason: ExitArg,
        /// Failure message, for `--reason failed`.
        #[arg(long, default_value = "")]
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExitArg {
    Succeeded,
    Failed,
    Killed,
    Terminated,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        ArborConfig::from_file(&cli.config)?
    } else {
        ArborConfig::default()
    };
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    debug!(config = ?cli.config, store = ?config.store.path, "configuration loaded");

    run(cli.command, &config, &cli.user).await
}

/// Dispatch one subcommand. The task store is opened only by commands that
/// use it.
async fn run(command: Command, config: &ArborConfig, user: &str) -> anyhow::Result<()> {
    let open = || commands::Context::open(config, user);
    match command {
        Command::InitConfig { data_dir } => commands::config::init(&data_dir),
        Command::Create {
            config_file,
            fork,
            parent,
            no_pause,
            context_dir,
            project,
        } => {
            let args = commands::task::CreateArgs {
                config_file,
                fork: fork.map(TaskId::from),
                parent: parent.map(TaskId::from),
                no_pause,
                context_dir,
                project,
            };
            commands::task::create(&open()?, args).await
        }
        Command::Kill { task_id, from_root } => {
            commands::task::kill(&open()?, &TaskId::from(task_id), from_root).await
        }
        Command::Pause { task_id } => commands::task::pause(&open()?, &TaskId::from(task_id)).await,
        Command::Unpause { task_id } => {
            commands::task::unpause(&open()?, &TaskId::from(task_id)).await
        }
        Command::SetPriority { job_id, priority } => {
            commands::task::set_priority(&open()?, &JobId::from(job_id), priority).await
        }
        Command::Show { task_id } => commands::task::show(&open()?, &TaskId::from(task_id)).await,
        Command::ReportExit {
            allocation_id,
            reason,
            message,
        } => {
            let reason = match reason {
                ExitArg::Succeeded => arbor_scheduler::ExitReason::Succeeded,
                ExitArg::Failed => arbor_scheduler::ExitReason::Failed(message),
                ExitArg::Killed => arbor_scheduler::ExitReason::Killed,
                ExitArg::Terminated => arbor_scheduler::ExitReason::Terminated,
            };
            commands::task::report_exit(&open()?, allocation_id, reason)
        }
    }
}

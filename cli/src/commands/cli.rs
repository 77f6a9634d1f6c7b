use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskmux", about = "Orchestrate AI-driven tasks over backend sessions")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the configured backend provider (sdk or cli).
    #[arg(long, global = true)]
    pub backend: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a prompt as a new task and stream its output.
    Run(RunArgs),

    /// Inspect and manage persisted tasks.
    Tasks(TasksArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Prompt text for the task.
    pub prompt: String,

    /// Task name; defaults to a prompt prefix.
    #[arg(long)]
    pub name: Option<String>,

    /// Project directory injected as session context.
    #[arg(long)]
    pub dir: Option<String>,

    /// Reuse the most recent session when it is still live.
    #[arg(long)]
    pub resume: bool,

    /// Parent task id for sub-tasks.
    #[arg(long)]
    pub parent: Option<String>,

    /// Task ids this task depends on. Can be specified multiple times.
    #[arg(long = "after", action = clap::ArgAction::Append)]
    pub dependencies: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: TasksCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TasksCommand {
    /// List active and archived tasks.
    List,

    /// Show one task in full.
    Show { id: String },

    /// Print a task's output history (bounded tail read).
    History {
        id: String,
        /// Maximum bytes to read from the end of the history file.
        #[arg(long)]
        max: Option<u64>,
    },

    /// Delete a task and its sub-task tree.
    Delete { id: String },

    /// Report running tasks with no recent progress.
    Stuck {
        /// Progress timeout in seconds.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },

    /// Archive terminal tasks beyond the most recent N.
    Archive {
        #[arg(long, default_value_t = 50)]
        keep: usize,
    },
}

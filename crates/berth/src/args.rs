use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for berth.
pub struct Cli {
    /// Override the berth directory location
    #[arg(long, global = true, value_name = "DIR")]
    pub dir: Option<String>,

    /// Override the repository directory (defaults to current git project)
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_dir: Option<String>,

    /// Enable colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Never prompt; stale locks are reclaimed automatically
    #[arg(long, global = true)]
    pub no_prompt: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    /// The primary command to execute.
    pub command: Commands,
}

/// Options controlling how a workspace is prepared.
#[derive(Args, Debug, Clone, Default)]
pub struct PrepareArgs {
    /// Base reference to sync to (defaults to the repository trunk)
    #[arg(long, value_name = "REF")]
    pub base: Option<String>,

    /// Create or reset this branch at the base
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,

    /// Task id recorded on the workspace
    #[arg(long, value_name = "ID")]
    pub task: Option<String>,

    /// Skip the configured update commands
    #[arg(long)]
    pub no_update: bool,
}

#[derive(Subcommand)]
/// CLI subcommands supported by berth.
pub enum Commands {
    /// Lock and prepare a workspace, run a command in it, then release it
    Run {
        /// Preparation options.
        #[command(flatten)]
        prepare: PrepareArgs,

        /// Command to execute (if omitted, opens interactive shell)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Lock and prepare a workspace for the calling shell and print its path
    Acquire {
        /// Preparation options.
        #[command(flatten)]
        prepare: PrepareArgs,
    },

    /// Lock a registered workspace for the calling shell
    Lock {
        /// Workspace path
        path: String,
    },

    /// Release the lock on a workspace
    Unlock {
        /// Workspace path
        path: String,

        /// Remove the lock even if another process holds it
        #[arg(long)]
        force: bool,
    },

    /// Sync a locked workspace and run the update commands
    Prepare {
        /// Workspace path
        path: String,

        /// Preparation options.
        #[command(flatten)]
        prepare: PrepareArgs,
    },

    /// Mark a workspace as primary so it is never selected automatically
    Primary {
        /// Workspace path
        path: String,

        /// Clear the primary flag instead
        #[arg(long)]
        unset: bool,
    },

    /// Show workspaces and their lock status
    #[command(alias = "ls")]
    List {
        /// Show workspaces of every repository
        #[arg(long)]
        all: bool,
    },

    /// Register an existing checkout as a workspace
    Register {
        /// Directory to register
        path: String,

        /// Mark the workspace as primary
        #[arg(long)]
        primary: bool,
    },

    /// Remove a workspace from the registry, leaving its files alone
    #[command(alias = "rm")]
    Forget {
        /// Workspace path
        path: String,
    },
}

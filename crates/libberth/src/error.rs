use std::{
    io,
    path::{Path, PathBuf},
    result::Result as StdResult,
    time::Duration,
};
use thiserror::Error;

/// Custom Result type for berth operations.
pub type Result<T> = StdResult<T, BerthError>;

/// Berth-specific error types
#[derive(Error, Debug)]
pub enum BerthError {
    /// The workspace carries a valid lock held by someone else.
    #[error("Workspace {} is locked by {holder}", .path.display())]
    AlreadyLocked {
        /// Root of the locked workspace.
        path: PathBuf,
        /// Human-readable description of the current holder.
        holder: String,
    },

    /// A stale lock was found but reclaiming it was declined or timed out.
    #[error("Reclaiming the stale lock on {} was declined", .path.display())]
    StaleLockDeclined {
        /// Root of the workspace whose lock was left in place.
        path: PathBuf,
    },

    /// The lock on a workspace is not held by this process or its parent.
    #[error("Workspace {} is not locked by this session", .path.display())]
    NotLockOwner {
        /// Root of the workspace.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The working tree has uncommitted or untracked changes.
    #[error("Workspace {} has uncommitted changes", .path.display())]
    DirtyWorkspace {
        /// Root of the dirty workspace.
        path: PathBuf,
    },

    /// Fetching or checking out the base reference failed.
    #[error("Failed to sync {}: {message}", .path.display())]
    VcsSyncFailed {
        /// Root of the workspace being synced.
        path: PathBuf,
        /// Error reported by the version control collaborator.
        message: String,
    },

    /// An update command exited unsuccessfully.
    #[error("Update command '{title}' failed ({})", describe_exit(.code))]
    UpdateCommandFailed {
        /// Title of the failing command.
        title: String,
        /// Exit code, when the command exited normally.
        code: Option<i32>,
    },

    /// An update command ran past its timeout and was killed.
    #[error("Update command '{title}' timed out after {}s", .timeout.as_secs())]
    UpdateCommandTimedOut {
        /// Title of the command.
        title: String,
        /// Timeout that expired.
        timeout: Duration,
    },

    /// An update command could not be started or waited on.
    #[error("Failed to run update command '{title}': {source}")]
    UpdateCommandIo {
        /// Title of the command.
        title: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The registry could not be read or parsed.
    #[error("Failed to read registry {}: {message}", .path.display())]
    RegistryReadFailed {
        /// Location of the registry.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The registry could not be written.
    #[error("Failed to write registry {}: {message}", .path.display())]
    RegistryWriteFailed {
        /// Location of the registry.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// No registry entry exists for the path.
    #[error("No workspace registered at {}", .path.display())]
    UnknownWorkspace {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A registry entry already exists for the path.
    #[error("A workspace is already registered at {}", .path.display())]
    WorkspaceExists {
        /// Path that is already registered.
        path: PathBuf,
    },

    /// Materializing a new workspace failed.
    #[error("Failed to create workspace: {0}")]
    CreateFailed(String),

    /// A configuration file could not be loaded.
    #[error("Invalid configuration in {}: {message}", .path.display())]
    Config {
        /// Configuration file path.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A contextual precondition failed (e.g. not inside a Git repo).
    #[error("Context error: {0}")]
    Context(String),

    /// A command run in a workspace exited unsuccessfully.
    #[error("Command exited with code {code}")]
    CommandExit {
        /// Exit code to propagate.
        code: i32,
    },

    /// The operation was cancelled by the user.
    #[error("Aborted by user")]
    UserAborted,
}

impl BerthError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UserAborted => 130,
            Self::CommandExit { code } => *code,
            Self::AlreadyLocked { .. }
            | Self::StaleLockDeclined { .. }
            | Self::NotLockOwner { .. }
            | Self::UnknownWorkspace { .. }
            | Self::WorkspaceExists { .. } => 2,
            Self::DirtyWorkspace { .. } => 3,
            Self::VcsSyncFailed { .. } => 4,
            Self::UpdateCommandFailed { .. }
            | Self::UpdateCommandTimedOut { .. }
            | Self::UpdateCommandIo { .. } => 5,
            Self::RegistryReadFailed { .. } | Self::RegistryWriteFailed { .. } => 6,
            _ => 1,
        }
    }
}

/// Build a mapper from an I/O error to [`BerthError::Io`] for `path`.
pub fn map_io(path: &Path) -> impl FnOnce(io::Error) -> BerthError + '_ {
    move |source| BerthError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Render an optional exit code for error messages.
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

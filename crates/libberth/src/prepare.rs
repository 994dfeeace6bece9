use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::{
    error::{BerthError, Result},
    lock::LockHandle,
    signals::track_foreground,
    vcs::{SyncTarget, Vcs},
};

/// A configured command run after a workspace has been synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCommand {
    /// Name shown in progress and error messages.
    pub title: String,
    /// Shell command line, run with `sh -c`.
    pub command: String,
    /// Working directory relative to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Continue with the next command when this one fails.
    #[serde(default, alias = "allowFailure")]
    pub allow_failure: bool,
    /// Kill the command after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl UpdateCommand {
    /// A command that must succeed, with no extra settings.
    pub fn new(title: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            command: command.into(),
            cwd: None,
            env: BTreeMap::new(),
            allow_failure: false,
            timeout_secs: None,
        }
    }

    /// Mark the command as allowed to fail.
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }
}

/// Parameters for preparing a workspace.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Reference to sync to. `None` means the default trunk.
    pub base_ref: Option<String>,
    /// Optional task branch created at the base.
    pub branch: Option<String>,
    /// Task id recorded on the registry entry once preparation succeeds.
    pub task_id: Option<String>,
    /// Commands to run after syncing, in order.
    pub update_commands: Vec<UpdateCommand>,
    /// Timeout for commands that do not set their own.
    pub command_timeout: Option<Duration>,
}

/// How a single update command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Exited with status zero.
    Succeeded,
    /// Exited unsuccessfully; `code` is `None` when killed by a signal.
    Failed {
        /// Exit code.
        code: Option<i32>,
    },
    /// Killed after exceeding its timeout.
    TimedOut,
}

/// Result of one update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Command title.
    pub title: String,
    /// How it ended.
    pub result: CommandResult,
}

/// Summary of a successful preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    /// Commit checked out in the workspace.
    pub commit: String,
    /// Every command that ran, including tolerated failures.
    pub commands: Vec<CommandOutcome>,
}

/// Brings a locked workspace to a known-good state.
pub struct Preparer<'a> {
    /// Version control collaborator.
    vcs: &'a dyn Vcs,
}

impl<'a> Preparer<'a> {
    /// Preparer using `vcs`.
    pub fn new(vcs: &'a dyn Vcs) -> Self {
        Self { vcs }
    }

    /// Prepare the workspace guarded by `lock`.
    ///
    /// Refuses dirty working trees before touching version control. The lock
    /// is left held on every outcome; releasing it is the caller's job.
    pub fn prepare(&self, lock: &LockHandle, options: &PrepareOptions) -> Result<PrepareReport> {
        let workspace = lock.workspace();
        let sync_error = |err: anyhow::Error| BerthError::VcsSyncFailed {
            path: workspace.to_path_buf(),
            message: format!("{err:#}"),
        };

        if self.vcs.is_dirty(workspace).map_err(sync_error)? {
            return Err(BerthError::DirtyWorkspace {
                path: workspace.to_path_buf(),
            });
        }

        let target = SyncTarget {
            base_ref: options.base_ref.clone(),
            branch: options.branch.clone(),
        };
        let commit = self.vcs.sync(workspace, &target).map_err(sync_error)?;
        info!(
            workspace = %workspace.display(),
            commit = %commit,
            "synced workspace"
        );

        let mut commands = Vec::with_capacity(options.update_commands.len());
        for command in &options.update_commands {
            let timeout = command
                .timeout_secs
                .map(Duration::from_secs)
                .or(options.command_timeout);
            let result = run_update_command(workspace, command, timeout)?;
            match (&result, command.allow_failure) {
                (CommandResult::Succeeded, _) => {}
                (CommandResult::Failed { code }, false) => {
                    return Err(BerthError::UpdateCommandFailed {
                        title: command.title.clone(),
                        code: *code,
                    });
                }
                (CommandResult::TimedOut, false) => {
                    return Err(BerthError::UpdateCommandTimedOut {
                        title: command.title.clone(),
                        timeout: timeout.unwrap_or_default(),
                    });
                }
                (failure, true) => {
                    warn!(title = %command.title, result = ?failure, "update command failed; continuing");
                }
            }
            commands.push(CommandOutcome {
                title: command.title.clone(),
                result,
            });
        }

        Ok(PrepareReport { commit, commands })
    }
}

/// Run one update command in `workspace`.
///
/// Command stdout is sent to our stderr so stdout stays free for results.
fn run_update_command(
    workspace: &Path,
    command: &UpdateCommand,
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let io_error = |source: io::Error| BerthError::UpdateCommandIo {
        title: command.title.clone(),
        source,
    };
    let cwd = match &command.cwd {
        Some(dir) => workspace.join(dir),
        None => workspace.to_path_buf(),
    };
    debug!(title = %command.title, cwd = %cwd.display(), "running update command");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command.command)
        .current_dir(&cwd)
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(io::stderr())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(io_error)?;
    let _foreground = track_foreground(child.id());

    let status: ExitStatus = match timeout {
        None => child.wait().map_err(io_error)?,
        Some(limit) => match child.wait_timeout(limit).map_err(io_error)? {
            Some(status) => status,
            None => {
                warn!(title = %command.title, "update command timed out; killing it");
                child.kill().map_err(io_error)?;
                child.wait().map_err(io_error)?;
                return Ok(CommandResult::TimedOut);
            }
        },
    };

    if status.success() {
        Ok(CommandResult::Succeeded)
    } else {
        Ok(CommandResult::Failed {
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lock::{Holder, LockManager},
        testing::{FakeProbe, init_repo},
        vcs::Git,
    };
    use std::{fs, sync::Mutex};
    use tempfile::TempDir;

    /// Version control double that records calls.
    struct FakeVcs {
        /// Reported dirtiness.
        dirty: bool,
        /// Whether sync fails.
        fail_sync: bool,
        /// Calls received.
        calls: Mutex<Vec<String>>,
    }

    impl FakeVcs {
        fn new(dirty: bool) -> Self {
            Self {
                dirty,
                fail_sync: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Vcs for FakeVcs {
        fn is_dirty(&self, _workspace: &Path) -> anyhow::Result<bool> {
            self.calls.lock().unwrap().push("is_dirty".to_string());
            Ok(self.dirty)
        }

        fn sync(&self, _workspace: &Path, target: &SyncTarget) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("sync {:?}", target.base_ref));
            if self.fail_sync {
                anyhow::bail!("remote unreachable");
            }
            Ok("abc123".to_string())
        }
    }

    fn locked(dir: &Path) -> (LockManager, LockHandle) {
        let locks = LockManager::with_probe(FakeProbe::alive(&[1]));
        let handle = locks
            .acquire(
                dir,
                &Holder {
                    pid: 1,
                    hostname: "test-host".to_string(),
                    command: "test".to_string(),
                },
            )
            .unwrap();
        (locks, handle)
    }

    fn touch(title: &str, file: &str) -> UpdateCommand {
        UpdateCommand::new(title, format!("touch {file}"))
    }

    #[test]
    fn test_dirty_workspace_aborts_before_sync_and_commands() {
        let dir = TempDir::new().unwrap();
        let (_locks, handle) = locked(dir.path());
        let vcs = FakeVcs::new(true);
        let options = PrepareOptions {
            update_commands: vec![touch("install", "installed")],
            ..PrepareOptions::default()
        };

        let err = Preparer::new(&vcs).prepare(&handle, &options).unwrap_err();

        assert!(matches!(err, BerthError::DirtyWorkspace { .. }));
        assert_eq!(vcs.calls(), ["is_dirty"]);
        assert!(!dir.path().join("installed").exists());
        // The lock is still held.
        assert!(handle.is_owned());
        assert!(crate::lock::lock_path(dir.path()).exists());
    }

    #[test]
    fn test_failing_command_stops_remaining_commands() {
        let dir = TempDir::new().unwrap();
        let (_locks, handle) = locked(dir.path());
        let vcs = FakeVcs::new(false);
        let options = PrepareOptions {
            update_commands: vec![
                UpdateCommand::new("install", "exit 3"),
                touch("lint", "linted").allow_failure(),
            ],
            ..PrepareOptions::default()
        };

        let err = Preparer::new(&vcs).prepare(&handle, &options).unwrap_err();

        match err {
            BerthError::UpdateCommandFailed { title, code } => {
                assert_eq!(title, "install");
                assert_eq!(code, Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("linted").exists());
    }

    #[test]
    fn test_allowed_failure_continues() {
        let dir = TempDir::new().unwrap();
        let (_locks, handle) = locked(dir.path());
        let vcs = FakeVcs::new(false);
        let options = PrepareOptions {
            base_ref: Some("release".to_string()),
            update_commands: vec![
                UpdateCommand::new("lint", "exit 1").allow_failure(),
                touch("build", "built"),
            ],
            ..PrepareOptions::default()
        };

        let report = Preparer::new(&vcs).prepare(&handle, &options).unwrap();

        assert_eq!(report.commit, "abc123");
        assert_eq!(
            report.commands,
            [
                CommandOutcome {
                    title: "lint".to_string(),
                    result: CommandResult::Failed { code: Some(1) },
                },
                CommandOutcome {
                    title: "build".to_string(),
                    result: CommandResult::Succeeded,
                },
            ]
        );
        assert!(dir.path().join("built").exists());
        assert_eq!(vcs.calls(), ["is_dirty", "sync Some(\"release\")"]);
    }

    #[test]
    fn test_sync_failure_skips_commands() {
        let dir = TempDir::new().unwrap();
        let (_locks, handle) = locked(dir.path());
        let mut vcs = FakeVcs::new(false);
        vcs.fail_sync = true;
        let options = PrepareOptions {
            update_commands: vec![touch("install", "installed")],
            ..PrepareOptions::default()
        };

        let err = Preparer::new(&vcs).prepare(&handle, &options).unwrap_err();

        assert!(matches!(err, BerthError::VcsSyncFailed { ref message, .. } if message.contains("remote unreachable")));
        assert!(!dir.path().join("installed").exists());
    }

    #[test]
    fn test_command_cwd_and_env() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let (_locks, handle) = locked(dir.path());
        let vcs = FakeVcs::new(false);
        let mut command = UpdateCommand::new("greet", "printf '%s' \"$GREETING\" > out.txt");
        command.cwd = Some(PathBuf::from("sub"));
        command.env.insert("GREETING".to_string(), "hello".to_string());

        let options = PrepareOptions {
            update_commands: vec![command],
            ..PrepareOptions::default()
        };
        Preparer::new(&vcs).prepare(&handle, &options).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("sub").join("out.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_command_timeout() {
        let dir = TempDir::new().unwrap();
        let (_locks, handle) = locked(dir.path());
        let vcs = FakeVcs::new(false);
        let mut slow = UpdateCommand::new("slow", "sleep 5");
        slow.timeout_secs = Some(1);
        let options = PrepareOptions {
            update_commands: vec![slow, touch("after", "after")],
            ..PrepareOptions::default()
        };

        let err = Preparer::new(&vcs).prepare(&handle, &options).unwrap_err();

        assert!(matches!(
            err,
            BerthError::UpdateCommandTimedOut { ref title, timeout }
                if title == "slow" && timeout == Duration::from_secs(1)
        ));
        assert!(!dir.path().join("after").exists());
    }

    #[test]
    fn test_update_command_config_forms() {
        let command: UpdateCommand = toml::from_str(
            r#"
                title = "install"
                command = "npm ci"
                allowFailure = true
                env = { CI = "1" }
            "#,
        )
        .unwrap();
        assert!(command.allow_failure);
        assert_eq!(command.env.get("CI").map(String::as_str), Some("1"));

        let err = toml::from_str::<UpdateCommand>(
            r#"
                title = "install"
                command = "npm ci"
                retries = 3
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_prepare_real_repository() {
        let dir = TempDir::new().unwrap();
        let repo = init_repo(&dir.path().join("repo"));
        let (_locks, handle) = locked(&repo);

        let report = Preparer::new(&Git)
            .prepare(&handle, &PrepareOptions::default())
            .unwrap();

        assert_eq!(report.commit, crate::git::head_commit(&repo).unwrap());
        assert!(report.commands.is_empty());
    }
}

use std::{path::Path, result::Result as StdResult, sync::Arc, time::Duration};

use anyhow::Result;
use libberth::{
    BerthError, LockRecord, LockStatus, StaleLockPrompt, StaleReason, WorkspaceStatus,
};
use liboutput::{Output, OutputError};
use tracing::warn;

/// Convert output-layer failures into domain errors.
pub fn map_output_error(err: OutputError) -> BerthError {
    match err {
        OutputError::Cancelled => BerthError::UserAborted,
        other => BerthError::Context(format!("Output operation failed: {other}")),
    }
}

/// Emit an output result, mapping errors into `BerthError`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(map_output_error)?;
    Ok(())
}

/// Prompt for selection, returning `None` on cancellation.
pub fn prompt_select_optional(
    output: &dyn Output,
    prompt: &str,
    options: Vec<String>,
) -> Result<Option<usize>> {
    match output.select(prompt, options) {
        Ok(selection) => Ok(Some(selection)),
        Err(OutputError::Cancelled) => Ok(None),
        Err(err) => Err(map_output_error(err).into()),
    }
}

/// What to do after a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Try the same workspace again.
    Retry,
    /// Move on to a different workspace.
    ChooseAnother,
    /// Give up.
    Abort,
}

impl Recovery {
    /// Menu label.
    fn label(self) -> &'static str {
        match self {
            Self::Retry => "Retry",
            Self::ChooseAnother => "Choose another workspace",
            Self::Abort => "Abort",
        }
    }
}

/// Ask how to continue after `err` on `workspace`. Cancelling the menu aborts.
pub fn prompt_recovery(
    output: &dyn Output,
    workspace: &Path,
    err: &BerthError,
    allow_another: bool,
) -> Result<Recovery> {
    emit(output.fail(&err.to_string()))?;
    let mut choices = vec![Recovery::Retry];
    if allow_another {
        choices.push(Recovery::ChooseAnother);
    }
    choices.push(Recovery::Abort);

    let options = choices.iter().map(|c| c.label().to_string()).collect();
    let prompt = format!("{} is not usable. What next?", workspace.display());
    Ok(prompt_select_optional(output, &prompt, options)?.map_or(Recovery::Abort, |i| choices[i]))
}

/// Whether the interactive recovery prompt is offered for `err`.
pub fn is_recoverable(err: &BerthError) -> bool {
    matches!(
        err,
        BerthError::AlreadyLocked { .. }
            | BerthError::StaleLockDeclined { .. }
            | BerthError::DirtyWorkspace { .. }
            | BerthError::VcsSyncFailed { .. }
            | BerthError::UpdateCommandFailed { .. }
            | BerthError::UpdateCommandTimedOut { .. }
    )
}

/// Asks on the terminal before a stale lock is removed.
pub struct TerminalPrompt {
    /// Where the question is shown.
    output: Arc<dyn Output>,
    /// How long to wait for an answer.
    timeout: Duration,
}

impl TerminalPrompt {
    /// Prompt on `output`, treating silence longer than `timeout` as "no".
    pub fn new(output: Arc<dyn Output>, timeout: Duration) -> Self {
        Self { output, timeout }
    }
}

impl StaleLockPrompt for TerminalPrompt {
    fn confirm_reclaim(
        &self,
        workspace: &Path,
        record: Option<&LockRecord>,
        reason: &StaleReason,
    ) -> bool {
        let holder = record.map_or_else(|| "unknown holder".to_string(), LockRecord::describe);
        let prompt = format!(
            "{} has a stale lock ({reason}; {holder}). Remove it?",
            workspace.display()
        );
        match self.output.confirm_within(&prompt, self.timeout) {
            Ok(answer) => answer,
            Err(OutputError::TimedOut) => {
                #[allow(clippy::let_underscore_must_use)]
                let _ = self.output.warn("No answer; leaving the lock in place.");
                false
            }
            Err(err) => {
                warn!(error = %err, "stale lock prompt failed");
                false
            }
        }
    }
}

/// Describe a lock state for listings.
pub fn describe_lock(status: &LockStatus) -> String {
    match status {
        LockStatus::Unlocked => "free".to_string(),
        LockStatus::Held(record) => format!("locked by {}", record.describe()),
        LockStatus::Stale {
            record: Some(record),
            reason,
        } => format!("stale ({reason}), held by {}", record.describe()),
        LockStatus::Stale {
            record: None,
            reason,
        } => format!("stale ({reason})"),
    }
}

/// Render one workspace in list output.
pub fn render_status(output: &dyn Output, status: &WorkspaceStatus) -> Result<()> {
    let entry = &status.entry;
    let section = output.section(&entry.label()).map_err(map_output_error)?;
    emit(section.item("path", &entry.path.display().to_string()))?;
    emit(section.item("lock", &describe_lock(&status.lock)))?;
    if entry.primary {
        emit(section.item("primary", "yes"))?;
    }
    if let Some(task) = &entry.task_id {
        emit(section.item("task", task))?;
    }
    if let Some(description) = &entry.description {
        emit(section.item("description", description))?;
    }
    if !status.present {
        emit(section.warn("directory is missing"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libberth::{LOCK_SCHEMA_VERSION, Holder};
    use std::path::PathBuf;

    #[test]
    fn test_describe_lock() {
        let record = LockRecord::new(&Holder {
            pid: 7,
            hostname: "devbox".to_string(),
            command: "berth run".to_string(),
        });
        assert_eq!(record.version, LOCK_SCHEMA_VERSION);

        assert_eq!(describe_lock(&LockStatus::Unlocked), "free");
        assert!(describe_lock(&LockStatus::Held(record.clone())).starts_with("locked by pid 7 on devbox"));
        let stale = LockStatus::Stale {
            record: Some(record),
            reason: StaleReason::HolderExited,
        };
        assert!(describe_lock(&stale).starts_with("stale (holder process is no longer running)"));
        let unreadable = LockStatus::Stale {
            record: None,
            reason: StaleReason::Unreadable("EOF".to_string()),
        };
        assert_eq!(
            describe_lock(&unreadable),
            "stale (lock file is unreadable: EOF)"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        let path = PathBuf::from("/ws");
        let cases = vec![
            // (error, recoverable)
            (BerthError::DirtyWorkspace { path: path.clone() }, true),
            (
                BerthError::AlreadyLocked {
                    path: path.clone(),
                    holder: "pid 1".to_string(),
                },
                true,
            ),
            (
                BerthError::UpdateCommandFailed {
                    title: "install".to_string(),
                    code: Some(1),
                },
                true,
            ),
            (BerthError::UnknownWorkspace { path }, false),
            (BerthError::UserAborted, false),
        ];

        for (err, expected) in cases {
            assert_eq!(is_recoverable(&err), expected, "for {err}");
        }
    }

    #[test]
    fn test_output_error_mapping() {
        assert!(matches!(
            map_output_error(OutputError::Cancelled),
            BerthError::UserAborted
        ));
        assert!(matches!(
            map_output_error(OutputError::TimedOut),
            BerthError::Context(_)
        ));
    }
}

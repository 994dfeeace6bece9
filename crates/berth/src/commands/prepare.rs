use std::path::Path;

use anyhow::Result;
use libberth::{
    BerthError, CommandResult, Holder, LockHandle, PrepareOptions, PrepareReport, normalize_path,
};
use liboutput::Output;

use crate::{
    args::PrepareArgs,
    commands::Session,
    ui::{Recovery, emit, is_recoverable, prompt_recovery},
};

/// Length of abbreviated commit hashes in messages.
const SHORT_HASH: usize = 10;

/// How an interactive preparation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// The workspace is ready.
    Ready,
    /// The user asked for a different workspace.
    ChooseAnother,
}

/// Prepare the workspace behind `lock`, offering retry, another workspace
/// (when `can_choose_another`) or abort on failure when interactive.
pub fn prepare_interactively(
    session: &Session,
    lock: &LockHandle,
    options: &PrepareOptions,
    can_choose_another: bool,
) -> Result<Prepared> {
    let output = session.output.as_ref();
    let workspace = lock.workspace();
    loop {
        emit(output.message(&format!("Preparing {}", workspace.display())))?;
        let err = match session.berth.prepare(lock, options) {
            Ok(report) => {
                report_prepared(output, &report)?;
                return Ok(Prepared::Ready);
            }
            Err(err) => err,
        };
        if !session.interactive || !is_recoverable(&err) {
            return Err(err.into());
        }
        match prompt_recovery(output, workspace, &err, can_choose_another)? {
            Recovery::Retry => {}
            Recovery::ChooseAnother => return Ok(Prepared::ChooseAnother),
            Recovery::Abort => return Err(BerthError::UserAborted.into()),
        }
    }
}

/// Summarize a successful preparation.
fn report_prepared(output: &dyn Output, report: &PrepareReport) -> Result<()> {
    for outcome in &report.commands {
        match outcome.result {
            CommandResult::Succeeded => {}
            CommandResult::Failed { code } => emit(output.warn(&format!(
                "{} failed ({}); continuing",
                outcome.title,
                code.map_or_else(|| "signal".to_string(), |c| format!("exit code {c}"))
            )))?,
            CommandResult::TimedOut => {
                emit(output.warn(&format!("{} timed out; continuing", outcome.title)))?;
            }
        }
    }
    let short = report.commit.get(..SHORT_HASH).unwrap_or(&report.commit);
    emit(output.success(&format!("Workspace ready at {short}")))
}

/// Run the `berth prepare` command logic.
///
/// Works on a workspace locked by this shell (`berth lock`/`berth acquire`),
/// or locks a free workspace for the duration of the preparation.
pub fn prepare(session: &Session, path: &Path, args: &PrepareArgs) -> Result<()> {
    let path = normalize_path(path)?;
    let config = session.workspace_config(&path)?;
    let options = Session::prepare_options(&config, args);

    let lock = match session.berth.locks().adopt(&path) {
        Ok(lock) => lock,
        Err(BerthError::NotLockOwner { .. }) => {
            session
                .berth
                .lock(&path, &Holder::current("berth prepare"), &session.reclaim_mode())?
                .lock
        }
        Err(err) => return Err(err.into()),
    };

    let result = prepare_interactively(session, &lock, &options, false);
    session.berth.release(lock)?;
    result.map(|_| ())
}

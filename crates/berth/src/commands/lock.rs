use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::Result;
use libberth::{BerthError, Holder, Selection, Selector, normalize_path};

use crate::{
    commands::Session,
    ui::{Recovery, emit, is_recoverable, prompt_recovery},
};

/// Run the `berth lock` command logic.
///
/// The lock is recorded for the calling shell and outlives this process;
/// the locked path is printed on stdout.
pub fn lock(session: &Session, path: &Path) -> Result<()> {
    let holder = Holder::parent_process("berth lock");
    let mode = session.reclaim_mode();
    let mut target = path.to_path_buf();

    loop {
        let err = match session.berth.lock(&target, &holder, &mode) {
            Ok(lease) => {
                let path = lease.entry.path.clone();
                let record = lease.lock.keep();
                emit(session.output.success(&format!(
                    "Locked {} for pid {}",
                    path.display(),
                    record.pid
                )))?;
                println!("{}", path.display());
                return Ok(());
            }
            Err(err) => err,
        };
        if !session.interactive || !is_recoverable(&err) {
            return Err(err.into());
        }
        match prompt_recovery(session.output.as_ref(), &target, &err, true)? {
            Recovery::Retry => {}
            Recovery::ChooseAnother => target = another_workspace(session, &target)?,
            Recovery::Abort => return Err(BerthError::UserAborted.into()),
        }
    }
}

/// A free workspace of the same repository as `current`.
fn another_workspace(session: &Session, current: &Path) -> Result<PathBuf> {
    let current = normalize_path(current)?;
    let entry = session
        .berth
        .registry()
        .find(&current)?
        .ok_or_else(|| BerthError::UnknownWorkspace {
            path: current.clone(),
        })?;

    let mode = session.reclaim_mode();
    let selector = Selector::new(session.berth.registry(), session.berth.locks(), &mode);
    match selector.select_excluding(&entry.repository_id, &HashSet::from([current]))? {
        Selection::Reuse(other) => Ok(other.path),
        Selection::New => Err(BerthError::Context(
            "No other free workspace is registered for this repository".to_string(),
        )
        .into()),
    }
}

/// Run the `berth unlock` command logic.
pub fn unlock(session: &Session, path: &Path, force: bool) -> Result<()> {
    session.berth.unlock(path, force)?;
    emit(session.output.success(&format!("Unlocked {}", path.display())))
}

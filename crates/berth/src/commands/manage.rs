use std::path::Path;

use anyhow::Result;
use libberth::{BerthError, find_root, identify};

use crate::{commands::Session, ui::emit};

/// Run the `berth primary` command logic.
pub fn primary(session: &Session, path: &Path, unset: bool) -> Result<()> {
    let entry = session.berth.set_primary(path, !unset)?;
    let msg = if entry.primary {
        format!("{} is now primary", entry.path.display())
    } else {
        format!("{} is no longer primary", entry.path.display())
    };
    emit(session.output.success(&msg))
}

/// Run the `berth register` command logic.
///
/// The repository is identified from the checkout being registered.
pub fn register(session: &Session, path: &Path, primary: bool) -> Result<()> {
    let root = find_root(path).ok_or_else(|| {
        BerthError::Context(format!("{} is not inside a git repository", path.display()))
    })?;
    let repository = identify(&root)?;
    let entry = session.berth.register(path, &repository, primary)?;
    emit(session.output.success(&format!(
        "Registered {} for {repository}{}",
        entry.path.display(),
        if primary { " as primary" } else { "" }
    )))
}

/// Run the `berth forget` command logic.
pub fn forget(session: &Session, path: &Path) -> Result<()> {
    let entry = session.berth.forget(path)?;
    emit(session.output.success(&format!(
        "Forgot {}; its files were left in place",
        entry.path.display()
    )))
}

use anyhow::Result;
use libberth::identify;

use crate::{
    commands::Session,
    ui::{emit, map_output_error, render_status},
};

/// Run the `berth list` command logic.
///
/// Inside a repository only its workspaces are shown unless `all` is set.
pub fn list(session: &Session, all: bool) -> Result<()> {
    let output = session.output.as_ref();
    let repository = match (&session.repo_root, all) {
        (Some(root), false) => Some(identify(root)?),
        _ => None,
    };

    let listing = session.berth.list_with_lock_status(repository.as_ref())?;
    if listing.is_empty() {
        emit(output.message("No workspaces registered."))?;
        return Ok(());
    }

    for (id, statuses) in listing {
        let section = output.section(id.as_str()).map_err(map_output_error)?;
        for status in &statuses {
            render_status(section.as_ref(), status)?;
        }
    }
    Ok(())
}

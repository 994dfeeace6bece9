use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::git;

/// Where a prepared workspace should end up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTarget {
    /// Branch, tag, remote branch or commit. `None` means the default trunk.
    pub base_ref: Option<String>,
    /// Task branch to create or reset at the base. `None` leaves HEAD detached.
    pub branch: Option<String>,
}

/// Version control operations the preparer relies on.
pub trait Vcs: Send + Sync {
    /// Whether the working tree has uncommitted or untracked changes.
    fn is_dirty(&self, workspace: &Path) -> Result<bool>;

    /// Fetch and check out `target`, returning the commit now checked out.
    fn sync(&self, workspace: &Path, target: &SyncTarget) -> Result<String>;
}

/// [`Vcs`] implementation that shells out to `git`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git;

impl Vcs for Git {
    fn is_dirty(&self, workspace: &Path) -> Result<bool> {
        git::has_uncommitted_changes(workspace)
    }

    fn sync(&self, workspace: &Path, target: &SyncTarget) -> Result<String> {
        let has_origin = git::has_remote(workspace, "origin")?;
        if has_origin {
            debug!(workspace = %workspace.display(), "fetching origin");
            git::fetch(workspace, "origin")?;
        }

        let commit = git::resolve_base(workspace, target.base_ref.as_deref(), has_origin)?;
        match &target.branch {
            Some(branch) => git::checkout_branch(workspace, branch, &commit)?,
            None => git::checkout_detached(workspace, &commit)?,
        }
        Ok(commit)
    }
}

use std::{collections::HashSet, path::PathBuf};

use tracing::{debug, info, warn};

use crate::{
    error::Result,
    lock::{LockManager, LockStatus, ReclaimMode},
    registry::Registry,
    types::{LockSummary, RepositoryId, WorkspaceEntry},
};

/// Outcome of workspace selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Reuse this existing workspace.
    Reuse(WorkspaceEntry),
    /// No workspace is available; create a new one.
    New,
}

/// Picks a reusable workspace for a repository.
///
/// Candidates are considered in registry order and the first eligible one
/// wins. Primary workspaces are never candidates. Lock state always comes
/// from the lock files; the registry cache is only refreshed.
pub struct Selector<'a> {
    /// Workspace metadata.
    registry: &'a Registry,
    /// Lock files.
    locks: &'a LockManager,
    /// Stale lock policy.
    mode: &'a ReclaimMode,
}

impl<'a> Selector<'a> {
    /// Selector over `registry` and `locks`, reclaiming stale locks per `mode`.
    pub fn new(registry: &'a Registry, locks: &'a LockManager, mode: &'a ReclaimMode) -> Self {
        Self {
            registry,
            locks,
            mode,
        }
    }

    /// Select a workspace for `repository`.
    pub fn select(&self, repository: &RepositoryId) -> Result<Selection> {
        self.select_excluding(repository, &HashSet::new())
    }

    /// Select a workspace for `repository`, skipping paths in `excluded`.
    pub fn select_excluding(
        &self,
        repository: &RepositoryId,
        excluded: &HashSet<PathBuf>,
    ) -> Result<Selection> {
        let entries = self.registry.list(repository)?;
        for entry in entries
            .into_iter()
            .filter(|entry| !entry.primary && !excluded.contains(&entry.path))
        {
            if !entry.path.is_dir() {
                warn!(workspace = %entry.path.display(), "registered workspace is missing; skipping");
                continue;
            }

            let status = match self.locks.status(&entry.path) {
                Ok(status) => status,
                Err(err) => {
                    warn!(workspace = %entry.path.display(), error = %err, "cannot read lock; skipping");
                    continue;
                }
            };

            match status {
                LockStatus::Unlocked => {
                    debug!(workspace = %entry.path.display(), "selected unlocked workspace");
                    self.refresh_cache(&entry, None);
                    return Ok(Selection::Reuse(entry));
                }
                LockStatus::Held(record) => {
                    debug!(
                        workspace = %entry.path.display(),
                        holder = %record.describe(),
                        "workspace in use; skipping"
                    );
                    self.refresh_cache(&entry, Some(record.summary()));
                }
                LockStatus::Stale { reason, .. } => {
                    match self.locks.reclaim(&entry.path, self.mode) {
                        Ok(()) => {
                            info!(
                                workspace = %entry.path.display(),
                                %reason,
                                "selected workspace after reclaiming stale lock"
                            );
                            self.refresh_cache(&entry, None);
                            return Ok(Selection::Reuse(entry));
                        }
                        Err(err) => {
                            debug!(workspace = %entry.path.display(), error = %err, "stale lock not reclaimed; skipping");
                        }
                    }
                }
            }
        }

        Ok(Selection::New)
    }

    /// Best-effort update of the cached lock holder.
    fn refresh_cache(&self, entry: &WorkspaceEntry, observed: Option<LockSummary>) {
        if entry.locked_by_cache == observed {
            return;
        }
        if let Err(err) = self.registry.set_lock_cache(&entry.path, observed) {
            warn!(workspace = %entry.path.display(), error = %err, "failed to refresh lock cache");
        }
    }
}

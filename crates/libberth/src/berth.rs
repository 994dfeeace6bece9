use std::{
    collections::{BTreeMap, HashSet},
    path::{self, Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    creator::WorkspaceCreator,
    error::{BerthError, Result, map_io},
    git,
    lock::{Holder, LOCK_FILE_NAME, LockHandle, LockManager, LockStatus, ReclaimMode},
    prepare::{PrepareOptions, PrepareReport, Preparer},
    registry::Registry,
    selector::{Selection, Selector},
    types::{LockSummary, MetadataPatch, RepositoryId, WorkspaceEntry},
    vcs::{Git, Vcs},
};

/// Upper bound on select-then-lock rounds before giving up.
const MAX_SELECT_ATTEMPTS: usize = 8;

/// A locked workspace handed to a caller.
#[derive(Debug)]
pub struct Lease {
    /// Registry entry of the workspace.
    pub entry: WorkspaceEntry,
    /// Lock guarding the workspace; dropping it releases the lock.
    pub lock: LockHandle,
    /// Whether the workspace was created for this lease.
    pub created: bool,
}

/// A registry entry together with its freshly read lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceStatus {
    /// Registry entry, with the lock cache refreshed.
    pub entry: WorkspaceEntry,
    /// Lock state read from the lock file.
    pub lock: LockStatus,
    /// Whether the workspace directory exists.
    pub present: bool,
}

/// All workspace statuses, grouped by repository.
pub type StatusListing = BTreeMap<RepositoryId, Vec<WorkspaceStatus>>;

/// Coordinates workspace selection, locking and preparation.
///
/// The registry and lock manager are injected; nothing here is global.
pub struct Berth {
    /// Workspace metadata.
    registry: Registry,
    /// Lock files.
    locks: LockManager,
    /// Version control used when preparing.
    vcs: Arc<dyn Vcs>,
}

impl Berth {
    /// Coordinator over explicit collaborators.
    pub fn new(registry: Registry, locks: LockManager, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            registry,
            locks,
            vcs,
        }
    }

    /// Coordinator for the berth directory `berth_dir`, backed by git.
    pub fn open(berth_dir: &Path, config: &Config) -> Self {
        Self::new(
            Registry::open(berth_dir),
            LockManager::new().with_threshold(config.stale_threshold()),
            Arc::new(Git),
        )
    }

    /// The workspace registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The lock manager.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Lock a reusable workspace of `repository`, creating one if none is free.
    ///
    /// When another process locks the selected workspace first, selection
    /// runs again without it.
    pub fn select_or_create(
        &self,
        repository: &RepositoryId,
        creator: &dyn WorkspaceCreator,
        holder: &Holder,
        mode: &ReclaimMode,
    ) -> Result<Lease> {
        let selector = Selector::new(&self.registry, &self.locks, mode);
        let mut lost = HashSet::new();

        for _ in 0..MAX_SELECT_ATTEMPTS {
            let (entry, created) = match selector.select_excluding(repository, &lost)? {
                Selection::Reuse(entry) => (entry, false),
                Selection::New => (creator.create_workspace(repository)?, true),
            };

            match self.locks.acquire(&entry.path, holder) {
                Ok(lock) => {
                    let entry = self.record_holder(entry, &lock);
                    return Ok(Lease {
                        entry,
                        lock,
                        created,
                    });
                }
                Err(BerthError::AlreadyLocked { path, holder }) => {
                    debug!(workspace = %path.display(), %holder, "lost lock race; selecting again");
                    lost.insert(path);
                }
                Err(err) => return Err(err),
            }
        }

        Err(BerthError::Context(format!(
            "No workspace of {repository} could be locked after {MAX_SELECT_ATTEMPTS} attempts"
        )))
    }

    /// Lock the registered workspace at `path`, reclaiming a stale lock per `mode`.
    pub fn lock(&self, path: &Path, holder: &Holder, mode: &ReclaimMode) -> Result<Lease> {
        let path = normalize_path(path)?;
        let entry = self
            .registry
            .find(&path)?
            .ok_or_else(|| BerthError::UnknownWorkspace { path: path.clone() })?;

        if let LockStatus::Stale { .. } = self.locks.status(&path)? {
            self.locks.reclaim(&path, mode)?;
        }
        let lock = self.locks.acquire(&path, holder)?;
        let entry = self.record_holder(entry, &lock);
        Ok(Lease {
            entry,
            lock,
            created: false,
        })
    }

    /// Remove the lock on `path`.
    ///
    /// Without `force`, only locks held by this session or stale locks are
    /// removed. A missing lock is not an error.
    pub fn unlock(&self, path: &Path, force: bool) -> Result<()> {
        let path = normalize_path(path)?;
        if !force
            && let LockStatus::Held(record) = self.locks.status(&path)?
            && !self.locks.is_ours(&record)
        {
            return Err(BerthError::AlreadyLocked {
                path,
                holder: record.describe(),
            });
        }
        self.locks.release(&path)?;
        self.update_cache(&path, None);
        Ok(())
    }

    /// Prepare the workspace guarded by `lock` and record the task id.
    pub fn prepare(&self, lock: &LockHandle, options: &PrepareOptions) -> Result<PrepareReport> {
        let report = Preparer::new(self.vcs.as_ref()).prepare(lock, options)?;
        if let Some(task_id) = &options.task_id {
            let patch = MetadataPatch {
                task_id: Some(task_id.clone()),
                ..MetadataPatch::default()
            };
            if let Err(err) = self.registry.update_metadata(lock.workspace(), &patch) {
                warn!(workspace = %lock.workspace().display(), error = %err, "failed to record task id");
            }
        }
        Ok(report)
    }

    /// Release `lock` and clear the cached holder.
    pub fn release(&self, lock: LockHandle) -> Result<()> {
        if !lock.is_owned() {
            return Ok(());
        }
        let path = lock.workspace().to_path_buf();
        lock.release()?;
        self.update_cache(&path, None);
        Ok(())
    }

    /// Mark or unmark the workspace at `path` as primary.
    pub fn set_primary(&self, path: &Path, primary: bool) -> Result<WorkspaceEntry> {
        let path = normalize_path(path)?;
        let entry = self.registry.set_primary(&path, primary)?;
        info!(workspace = %path.display(), primary, "updated primary flag");
        Ok(entry)
    }

    /// Every registered workspace, or those of `repository`, with live lock state.
    ///
    /// Lock files are authoritative; the registry cache is refreshed to match.
    pub fn list_with_lock_status(&self, repository: Option<&RepositoryId>) -> Result<StatusListing> {
        let mut listing = StatusListing::new();
        for (id, entries) in self.registry.all()? {
            if repository.is_some_and(|wanted| *wanted != id) {
                continue;
            }
            let statuses = entries
                .into_iter()
                .map(|entry| self.read_status(entry))
                .collect();
            listing.insert(id, statuses);
        }
        Ok(listing)
    }

    /// Register an existing directory as a workspace of `repository`.
    pub fn register(
        &self,
        path: &Path,
        repository: &RepositoryId,
        primary: bool,
    ) -> Result<WorkspaceEntry> {
        let path = path.canonicalize().map_err(map_io(path))?;
        if !path.is_dir() {
            return Err(BerthError::Context(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        let mut entry = WorkspaceEntry::new(repository.clone(), path);
        entry.primary = primary;
        self.registry.add(entry.clone())?;
        if let Err(err) = git::exclude_pattern(&entry.path, &format!("/{LOCK_FILE_NAME}*")) {
            debug!(workspace = %entry.path.display(), error = %err, "lock files not excluded from git");
        }
        info!(workspace = %entry.path.display(), %repository, primary, "registered workspace");
        Ok(entry)
    }

    /// Remove the registry entry at `path`. The directory is left alone.
    ///
    /// Refused while a valid lock is held on the workspace.
    pub fn forget(&self, path: &Path) -> Result<WorkspaceEntry> {
        let path = normalize_path(path)?;
        if let LockStatus::Held(record) = self.locks.status(&path)? {
            return Err(BerthError::AlreadyLocked {
                path,
                holder: record.describe(),
            });
        }
        let entry = self.registry.remove(&path)?;
        info!(workspace = %path.display(), "forgot workspace");
        Ok(entry)
    }

    /// Read the lock state of `entry` and refresh its cache.
    fn read_status(&self, mut entry: WorkspaceEntry) -> WorkspaceStatus {
        let present = entry.path.is_dir();
        let lock = match self.locks.status(&entry.path) {
            Ok(status) => status,
            Err(err) => {
                warn!(workspace = %entry.path.display(), error = %err, "cannot read lock");
                return WorkspaceStatus {
                    entry,
                    lock: LockStatus::Unlocked,
                    present,
                };
            }
        };
        let observed = lock.summary();
        if entry.locked_by_cache != observed {
            self.update_cache(&entry.path, observed.clone());
            entry.locked_by_cache = observed;
        }
        WorkspaceStatus {
            entry,
            lock,
            present,
        }
    }

    /// Cache the holder of a freshly acquired lock on `entry`.
    fn record_holder(&self, mut entry: WorkspaceEntry, lock: &LockHandle) -> WorkspaceEntry {
        let summary = lock.record().summary();
        self.update_cache(&entry.path, Some(summary.clone()));
        entry.locked_by_cache = Some(summary);
        entry
    }

    /// Best-effort write of the cached lock holder.
    fn update_cache(&self, path: &Path, cache: Option<LockSummary>) {
        match self.registry.set_lock_cache(path, cache) {
            Ok(()) | Err(BerthError::UnknownWorkspace { .. }) => {}
            Err(err) => {
                warn!(workspace = %path.display(), error = %err, "failed to update lock cache");
            }
        }
    }
}

/// Resolve `path` to the form stored in the registry.
///
/// Falls back to a lexically absolute path when the directory no longer exists.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(canonical) => Ok(canonical),
        Err(_) => path::absolute(path).map_err(map_io(path)),
    }
}

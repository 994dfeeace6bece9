use std::{
    collections::HashMap,
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::process::parent_id,
    path::{Path, PathBuf},
    process,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::{
    error::{BerthError, Result, map_io},
    types::LockSummary,
};

/// Name of the lock file placed in the root of every locked workspace.
pub const LOCK_FILE_NAME: &str = ".berth.lock";

/// Lock record schema version written by this build.
pub const LOCK_SCHEMA_VERSION: u32 = 1;

/// Age after which a lock is presumed abandoned.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Path of the lock file for `workspace`.
pub fn lock_path(workspace: &Path) -> PathBuf {
    workspace.join(LOCK_FILE_NAME)
}

/// Contents of a workspace lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Process id of the holder.
    pub pid: u32,
    /// Free-text description of what the holder is doing.
    pub command: String,
    /// Acquisition time.
    pub started_at: DateTime<Utc>,
    /// Host the holder runs on.
    pub hostname: String,
    /// Schema version.
    pub version: u32,
}

impl LockRecord {
    /// A current-version record for `holder`, stamped now.
    pub fn new(holder: &Holder) -> Self {
        Self {
            pid: holder.pid,
            command: holder.command.clone(),
            started_at: Utc::now(),
            hostname: holder.hostname.clone(),
            version: LOCK_SCHEMA_VERSION,
        }
    }

    /// The subset cached in the registry.
    pub fn summary(&self) -> LockSummary {
        LockSummary {
            pid: self.pid,
            started_at: self.started_at,
            hostname: self.hostname.clone(),
        }
    }

    /// One-line description of the holder for messages.
    pub fn describe(&self) -> String {
        format!(
            "pid {} on {} since {} ({})",
            self.pid,
            self.hostname,
            self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.command
        )
    }
}

/// Identity written into a new lock record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    /// Process id that owns the lock.
    pub pid: u32,
    /// Host of that process.
    pub hostname: String,
    /// What the process is doing.
    pub command: String,
}

impl Holder {
    /// The current process.
    pub fn current(command: impl Into<String>) -> Self {
        Self {
            pid: process::id(),
            hostname: current_hostname(),
            command: command.into(),
        }
    }

    /// The parent of the current process, typically the invoking shell.
    ///
    /// Used when the lock must outlive this process.
    pub fn parent_process(command: impl Into<String>) -> Self {
        Self {
            pid: parent_id(),
            hostname: current_hostname(),
            command: command.into(),
        }
    }
}

/// Hostname of this machine as recorded in lock files.
pub fn current_hostname() -> String {
    System::host_name().unwrap_or_else(|| "localhost".to_string())
}

/// Process liveness queries used for staleness checks.
pub trait ProcessProbe: Send + Sync {
    /// Hostname of the machine running the checks.
    fn hostname(&self) -> String;
    /// Whether `pid` names a live process on this host.
    fn is_alive(&self, pid: u32) -> bool;
}

/// [`ProcessProbe`] backed by the operating system process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn hostname(&self) -> String {
        current_hostname()
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut sys = System::new();
        sys.refresh_process(Pid::from_u32(pid))
    }
}

/// Why a lock record is considered abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The record was written with a schema this build does not understand.
    UnsupportedVersion(u32),
    /// The holder ran on this host and is no longer alive.
    HolderExited,
    /// The record is older than the staleness threshold.
    Expired(Duration),
    /// The lock file exists but could not be parsed.
    Unreadable(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported lock schema version {version}")
            }
            Self::HolderExited => f.write_str("holder process is no longer running"),
            Self::Expired(age) => write!(f, "lock is {}h old", age.as_secs() / 3600),
            Self::Unreadable(message) => write!(f, "lock file is unreadable: {message}"),
        }
    }
}

/// Freshly computed state of a workspace lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock file.
    Unlocked,
    /// A valid lock held by someone.
    Held(LockRecord),
    /// A lock file that may be reclaimed. `record` is `None` when unreadable.
    Stale {
        /// Parsed record, when readable.
        record: Option<LockRecord>,
        /// Why the lock is stale.
        reason: StaleReason,
    },
}

impl LockStatus {
    /// Summary suitable for the registry cache.
    pub fn summary(&self) -> Option<LockSummary> {
        match self {
            Self::Unlocked => None,
            Self::Held(record)
            | Self::Stale {
                record: Some(record),
                ..
            } => Some(record.summary()),
            Self::Stale { record: None, .. } => None,
        }
    }
}

/// Asks a human whether a stale lock may be removed.
pub trait StaleLockPrompt: Send + Sync {
    /// Return `true` to reclaim. Implementations treat a timeout as `false`.
    fn confirm_reclaim(
        &self,
        workspace: &Path,
        record: Option<&LockRecord>,
        reason: &StaleReason,
    ) -> bool;
}

/// How stale locks are handled.
#[derive(Clone)]
pub enum ReclaimMode {
    /// Ask before removing a stale lock.
    Interactive(Arc<dyn StaleLockPrompt>),
    /// Remove stale locks without asking.
    NonInteractive,
}

impl fmt::Debug for ReclaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interactive(_) => f.write_str("Interactive"),
            Self::NonInteractive => f.write_str("NonInteractive"),
        }
    }
}

/// Locks owned by this process, keyed by lock file path.
///
/// Shared with the termination-signal handler so it can release them.
#[derive(Debug, Clone, Default)]
pub struct HeldLocks {
    /// Lock file path to the record this process wrote.
    inner: Arc<Mutex<HashMap<PathBuf, LockRecord>>>,
}

impl HeldLocks {
    /// Lock the map, recovering from poisoning.
    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, LockRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a lock.
    fn insert(&self, path: PathBuf, record: LockRecord) {
        self.entries().insert(path, record);
    }

    /// Stop tracking a lock.
    fn forget(&self, path: &Path) {
        self.entries().remove(path);
    }

    /// Workspaces currently locked by this process.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.entries()
            .keys()
            .filter_map(|path| path.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Release every tracked lock that still carries our record. Returns the number removed.
    pub fn release_all(&self) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        let mut released = 0;
        for (path, record) in drained {
            match remove_if_owned(&path, &record) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "failed to release lock"),
            }
        }
        released
    }
}

/// Proof of holding the lock on a workspace.
///
/// Owning handles remove the lock file on [`LockHandle::release`] or drop,
/// but only while the file still carries the record they wrote.
#[derive(Debug)]
pub struct LockHandle {
    /// Workspace root.
    workspace: PathBuf,
    /// Lock file path.
    path: PathBuf,
    /// Record this handle wrote or adopted.
    record: LockRecord,
    /// Open lock file carrying the advisory lock, for handles that created it.
    file: Option<File>,
    /// Whether this handle removes the lock when released.
    owned: bool,
    /// Registry of locks held by this process.
    held: HeldLocks,
}

impl LockHandle {
    /// Root of the locked workspace.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// The lock record.
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Whether dropping this handle releases the lock.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Release the lock now.
    pub fn release(mut self) -> Result<()> {
        self.release_owned()
    }

    /// Leave the lock in place after this handle goes away.
    pub fn keep(mut self) -> LockRecord {
        self.owned = false;
        self.held.forget(&self.path);
        self.record.clone()
    }

    /// Remove the lock file if this handle owns it.
    fn release_owned(&mut self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;
        self.held.forget(&self.path);
        let removed = remove_if_owned(&self.path, &self.record).map_err(map_io(&self.path))?;
        if let Some(file) = self.file.take() {
            #[allow(clippy::let_underscore_must_use)]
            let _ = file.unlock();
        }
        if removed {
            info!(workspace = %self.workspace.display(), "released workspace lock");
        } else {
            warn!(
                workspace = %self.workspace.display(),
                "lock file no longer carries our record; leaving it in place"
            );
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = self.release_owned();
    }
}

/// Per-workspace mutual exclusion through lock files.
#[derive(Clone)]
pub struct LockManager {
    /// Liveness checks for holders.
    probe: Arc<dyn ProcessProbe>,
    /// Age after which a lock is stale.
    threshold: Duration,
    /// Locks owned by this process.
    held: HeldLocks,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Manager using the OS process table and the default threshold.
    pub fn new() -> Self {
        Self::with_probe(Arc::new(SystemProbe))
    }

    /// Manager with a custom liveness probe.
    pub fn with_probe(probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            probe,
            threshold: DEFAULT_STALE_THRESHOLD,
            held: HeldLocks::default(),
        }
    }

    /// Override the staleness threshold.
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Configured staleness threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Locks owned by this process.
    pub fn held(&self) -> HeldLocks {
        self.held.clone()
    }

    /// Create the lock file for `workspace`, failing if any lock file exists.
    ///
    /// The record is written to a temporary file and published with a
    /// no-clobber rename, so it is never visible partially written.
    pub fn acquire(&self, workspace: &Path, holder: &Holder) -> Result<LockHandle> {
        let path = lock_path(workspace);
        let record = LockRecord::new(holder);

        let mut temp = Builder::new()
            .prefix(&format!("{LOCK_FILE_NAME}."))
            .tempfile_in(workspace)
            .map_err(map_io(workspace))?;
        let body = serde_json::to_vec_pretty(&record).map_err(|e| BerthError::Io {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        temp.write_all(&body).map_err(map_io(&path))?;
        temp.write_all(b"\n").map_err(map_io(&path))?;
        temp.as_file().sync_all().map_err(map_io(&path))?;
        if let Err(err) = temp.as_file().try_lock_exclusive() {
            debug!(error = %err, "advisory lock unavailable for lock file");
        }

        let file = match temp.persist_noclobber(&path) {
            Ok(file) => file,
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BerthError::AlreadyLocked {
                    path: workspace.to_path_buf(),
                    holder: self.describe_holder(workspace),
                });
            }
            Err(err) => return Err(map_io(&path)(err.error)),
        };

        info!(
            workspace = %workspace.display(),
            pid = record.pid,
            "acquired workspace lock"
        );
        self.held.insert(path.clone(), record.clone());
        Ok(LockHandle {
            workspace: workspace.to_path_buf(),
            path,
            record,
            file: Some(file),
            owned: true,
            held: self.held.clone(),
        })
    }

    /// Remove the lock file for `workspace` regardless of holder.
    ///
    /// Idempotent: a missing lock file is not an error.
    pub fn release(&self, workspace: &Path) -> Result<()> {
        let path = lock_path(workspace);
        self.held.forget(&path);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(workspace = %workspace.display(), "removed workspace lock");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(map_io(&path)(err)),
        }
    }

    /// The current lock record, or `None` when missing or unparsable.
    pub fn lock_info(&self, workspace: &Path) -> Option<LockRecord> {
        let path = lock_path(workspace);
        let bytes = match read_lock(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read lock file");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unparsable lock file");
                None
            }
        }
    }

    /// Read and classify the lock on `workspace`.
    pub fn status(&self, workspace: &Path) -> Result<LockStatus> {
        let path = lock_path(workspace);
        match read_lock(&path).map_err(map_io(&path))? {
            Some(bytes) => Ok(self.classify(&bytes, Utc::now())),
            None => Ok(LockStatus::Unlocked),
        }
    }

    /// Why `record` is stale at `now`, if it is.
    ///
    /// Pid liveness is only consulted for records written on this host;
    /// records from other hosts are judged by age alone.
    pub fn stale_reason(&self, record: &LockRecord, now: DateTime<Utc>) -> Option<StaleReason> {
        if record.version != LOCK_SCHEMA_VERSION {
            return Some(StaleReason::UnsupportedVersion(record.version));
        }
        if record.hostname == self.probe.hostname() && !self.probe.is_alive(record.pid) {
            return Some(StaleReason::HolderExited);
        }
        if let Ok(age) = (now - record.started_at).to_std()
            && age > self.threshold
        {
            return Some(StaleReason::Expired(age));
        }
        None
    }

    /// Whether `record` is stale at `now`.
    pub fn is_stale(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        self.stale_reason(record, now).is_some()
    }

    /// Remove a stale lock from `workspace`.
    ///
    /// A missing lock is a no-op and a valid lock is [`BerthError::AlreadyLocked`].
    /// In interactive mode the prompt must confirm, otherwise the result is
    /// [`BerthError::StaleLockDeclined`].
    pub fn reclaim(&self, workspace: &Path, mode: &ReclaimMode) -> Result<()> {
        let path = lock_path(workspace);
        let Some(observed) = read_lock(&path).map_err(map_io(&path))? else {
            return Ok(());
        };
        let (record, reason) = match self.classify(&observed, Utc::now()) {
            LockStatus::Unlocked => return Ok(()),
            LockStatus::Held(record) => {
                return Err(BerthError::AlreadyLocked {
                    path: workspace.to_path_buf(),
                    holder: record.describe(),
                });
            }
            LockStatus::Stale { record, reason } => (record, reason),
        };

        if let ReclaimMode::Interactive(prompt) = mode
            && !prompt.confirm_reclaim(workspace, record.as_ref(), &reason)
        {
            info!(workspace = %workspace.display(), %reason, "stale lock left in place");
            return Err(BerthError::StaleLockDeclined {
                path: workspace.to_path_buf(),
            });
        }

        if advisory_lock_held(&path).map_err(map_io(&path))? {
            return Err(BerthError::AlreadyLocked {
                path: workspace.to_path_buf(),
                holder: record.map_or_else(|| "a running process".to_string(), |r| r.describe()),
            });
        }

        // Only one reclaimer can move the file aside; the loser sees NotFound.
        let tombstone = workspace.join(format!("{LOCK_FILE_NAME}.reclaim-{}", process::id()));
        match fs::rename(&path, &tombstone) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(map_io(&path)(err)),
        }

        let moved = fs::read(&tombstone).map_err(map_io(&tombstone))?;
        if moved != observed {
            // The lock changed between inspection and rename; put it back.
            let restored = fs::hard_link(&tombstone, &path);
            #[allow(clippy::let_underscore_must_use)]
            let _ = fs::remove_file(&tombstone);
            if let Err(err) = restored {
                warn!(path = %path.display(), error = %err, "failed to restore replaced lock file");
            }
            return Err(BerthError::AlreadyLocked {
                path: workspace.to_path_buf(),
                holder: self.describe_holder(workspace),
            });
        }

        fs::remove_file(&tombstone).map_err(map_io(&tombstone))?;
        info!(workspace = %workspace.display(), %reason, "reclaimed stale workspace lock");
        Ok(())
    }

    /// Whether `record` was written on this host by this process or its parent.
    pub fn is_ours(&self, record: &LockRecord) -> bool {
        record.hostname == self.probe.hostname()
            && (record.pid == process::id() || record.pid == parent_id())
    }

    /// A non-owning handle for a lock held by this process or its parent.
    ///
    /// Lets a later invocation from the same shell operate on a workspace
    /// locked by `berth lock`.
    pub fn adopt(&self, workspace: &Path) -> Result<LockHandle> {
        let not_owner = || BerthError::NotLockOwner {
            path: workspace.to_path_buf(),
        };
        let record = self.lock_info(workspace).ok_or_else(not_owner)?;
        if !self.is_ours(&record) {
            return Err(not_owner());
        }
        Ok(LockHandle {
            workspace: workspace.to_path_buf(),
            path: lock_path(workspace),
            record,
            file: None,
            owned: false,
            held: self.held.clone(),
        })
    }

    /// Classify raw lock file contents.
    fn classify(&self, bytes: &[u8], now: DateTime<Utc>) -> LockStatus {
        match serde_json::from_slice::<LockRecord>(bytes) {
            Ok(record) => match self.stale_reason(&record, now) {
                Some(reason) => LockStatus::Stale {
                    record: Some(record),
                    reason,
                },
                None => LockStatus::Held(record),
            },
            Err(err) => LockStatus::Stale {
                record: None,
                reason: StaleReason::Unreadable(err.to_string()),
            },
        }
    }

    /// Describe whoever holds `workspace` for an error message.
    fn describe_holder(&self, workspace: &Path) -> String {
        self.lock_info(workspace)
            .map_or_else(|| "an unreadable lock record".to_string(), |r| r.describe())
    }
}

/// Read a lock file, mapping a missing file to `None`.
fn read_lock(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove `path` if it still carries `record`. Returns whether it was removed.
fn remove_if_owned(path: &Path, record: &LockRecord) -> io::Result<bool> {
    let Some(bytes) = read_lock(path)? else {
        return Ok(false);
    };
    match serde_json::from_slice::<LockRecord>(&bytes) {
        Ok(current) if &current == record => {}
        _ => return Ok(false),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether a live process still holds the advisory lock on `path`.
fn advisory_lock_held(path: &Path) -> io::Result<bool> {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            file.unlock()?;
            Ok(false)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(true),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "advisory lock probe failed");
            Ok(false)
        }
    }
}

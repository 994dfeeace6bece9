use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use fs4::FileExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{
    error::{BerthError, Result},
    types::{LockSummary, MetadataPatch, RepositoryId, WorkspaceEntry},
};

/// File name of the registry inside the berth directory.
pub const REGISTRY_FILE_NAME: &str = "registry.json";

/// All known workspaces, grouped by repository in creation order.
pub type RegistryData = BTreeMap<RepositoryId, Vec<WorkspaceEntry>>;

/// Durable storage behind a [`Registry`].
pub trait RegistryStore: Send + Sync {
    /// Read the full registry. A store that was never written is empty.
    fn load(&self) -> Result<RegistryData>;

    /// Read, update and write back the registry as one serialized step.
    ///
    /// Nothing is written when `apply` fails.
    fn modify(&self, apply: &mut dyn FnMut(&mut RegistryData) -> Result<()>) -> Result<()>;
}

/// Registry persisted as a JSON file.
///
/// Writers serialize on an exclusive lock of a sidecar `.lock` file and
/// replace the registry atomically, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileRegistry {
    /// Registry file location.
    path: PathBuf,
}

impl JsonFileRegistry {
    /// Store backed by the file at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sidecar file used to serialize writers.
    fn lock_file_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Build a write failure for this registry.
    fn write_error(&self, message: impl Into<String>) -> BerthError {
        BerthError::RegistryWriteFailed {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    /// Atomically replace the registry file with `data`.
    fn write(&self, data: &RegistryData) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| self.write_error("registry path has no parent directory"))?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| self.write_error(e.to_string()))?;
        serde_json::to_writer_pretty(&mut temp, data)
            .map_err(|e| self.write_error(e.to_string()))?;
        temp.write_all(b"\n")
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| self.write_error(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| self.write_error(e.error.to_string()))?;
        Ok(())
    }
}

/// Holds the writer lock for the duration of a registry update.
struct WriterLock {
    /// The locked sidecar file.
    file: File,
}

impl WriterLock {
    /// Block until the writer lock at `path` is ours.
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for WriterLock {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl RegistryStore for JsonFileRegistry {
    fn load(&self) -> Result<RegistryData> {
        let read_error = |message: String| BerthError::RegistryReadFailed {
            path: self.path.clone(),
            message,
        };
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RegistryData::new()),
            Err(err) => return Err(read_error(err.to_string())),
        };
        if contents.trim().is_empty() {
            return Ok(RegistryData::new());
        }
        let mut data: RegistryData =
            serde_json::from_str(&contents).map_err(|e| read_error(e.to_string()))?;
        for (id, entries) in &mut data {
            for entry in entries {
                entry.repository_id = id.clone();
            }
        }
        Ok(data)
    }

    fn modify(&self, apply: &mut dyn FnMut(&mut RegistryData) -> Result<()>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e.to_string()))?;
        }
        let _guard =
            WriterLock::acquire(&self.lock_file_path()).map_err(|e| self.write_error(e.to_string()))?;
        let mut data = self.load()?;
        apply(&mut data)?;
        self.write(&data)?;
        debug!(path = %self.path.display(), "registry updated");
        Ok(())
    }
}

/// In-memory registry store.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    /// Current contents.
    data: Mutex<RegistryData>,
}

impl RegistryStore for MemoryRegistry {
    fn load(&self) -> Result<RegistryData> {
        Ok(self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn modify(&self, apply: &mut dyn FnMut(&mut RegistryData) -> Result<()>) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = data.clone();
        apply(&mut updated)?;
        *data = updated;
        Ok(())
    }
}

/// Workspace metadata operations over an injected [`RegistryStore`].
#[derive(Clone)]
pub struct Registry {
    /// Backing store.
    store: Arc<dyn RegistryStore>,
}

impl Registry {
    /// Registry over `store`.
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// Registry persisted in `registry.json` under `berth_dir`.
    pub fn open(berth_dir: &Path) -> Self {
        Self::new(Arc::new(JsonFileRegistry::new(
            berth_dir.join(REGISTRY_FILE_NAME),
        )))
    }

    /// Registry that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRegistry::default()))
    }

    /// Every repository and its workspaces.
    pub fn all(&self) -> Result<RegistryData> {
        self.store.load()
    }

    /// Workspaces of `repository` in creation order.
    pub fn list(&self, repository: &RepositoryId) -> Result<Vec<WorkspaceEntry>> {
        Ok(self.store.load()?.remove(repository).unwrap_or_default())
    }

    /// The entry registered at `path`, if any.
    pub fn find(&self, path: &Path) -> Result<Option<WorkspaceEntry>> {
        Ok(self
            .store
            .load()?
            .into_values()
            .flatten()
            .find(|entry| entry.path == path))
    }

    /// Append `entry` to its repository. Paths are unique across the registry.
    pub fn add(&self, entry: WorkspaceEntry) -> Result<()> {
        let mut pending = Some(entry);
        self.store.modify(&mut |data| {
            let Some(entry) = pending.take() else {
                return Ok(());
            };
            if data.values().flatten().any(|e| e.path == entry.path) {
                return Err(BerthError::WorkspaceExists { path: entry.path });
            }
            data.entry(entry.repository_id.clone())
                .or_default()
                .push(entry);
            Ok(())
        })
    }

    /// Apply `patch` to the entry at `path`.
    pub fn update_metadata(&self, path: &Path, patch: &MetadataPatch) -> Result<WorkspaceEntry> {
        self.update_entry(path, |entry| patch.apply(entry))
    }

    /// Mark or unmark the entry at `path` as primary.
    pub fn set_primary(&self, path: &Path, primary: bool) -> Result<WorkspaceEntry> {
        self.update_entry(path, |entry| entry.primary = primary)
    }

    /// Replace the cached lock holder of the entry at `path`.
    pub fn set_lock_cache(&self, path: &Path, cache: Option<LockSummary>) -> Result<()> {
        self.update_entry(path, |entry| entry.locked_by_cache = cache.clone())?;
        Ok(())
    }

    /// Remove the entry at `path` and return it.
    pub fn remove(&self, path: &Path) -> Result<WorkspaceEntry> {
        let mut removed = None;
        self.store.modify(&mut |data| {
            let mut emptied = None;
            for (id, entries) in data.iter_mut() {
                if let Some(index) = entries.iter().position(|e| e.path == path) {
                    removed = Some(entries.remove(index));
                    if entries.is_empty() {
                        emptied = Some(id.clone());
                    }
                    break;
                }
            }
            if let Some(id) = emptied {
                data.remove(&id);
            }
            if removed.is_none() {
                return Err(unknown(path));
            }
            Ok(())
        })?;
        removed.ok_or_else(|| unknown(path))
    }

    /// Run `update` on the entry at `path` and persist the result.
    fn update_entry<F>(&self, path: &Path, mut update: F) -> Result<WorkspaceEntry>
    where
        F: FnMut(&mut WorkspaceEntry),
    {
        let mut updated = None;
        self.store.modify(&mut |data| {
            let entry = data
                .values_mut()
                .flatten()
                .find(|e| e.path == path)
                .ok_or_else(|| unknown(path))?;
            update(entry);
            updated = Some(entry.clone());
            Ok(())
        })?;
        updated.ok_or_else(|| unknown(path))
    }
}

/// Error for a path with no registry entry.
fn unknown(path: &Path) -> BerthError {
    BerthError::UnknownWorkspace {
        path: path.to_path_buf(),
    }
}

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    config::CreateMethod,
    error::{BerthError, Result, map_io},
    git,
    lock::LOCK_FILE_NAME,
    registry::Registry,
    repository::project_name,
    types::{RepositoryId, WorkspaceEntry},
};

/// Materializes brand-new workspaces.
pub trait WorkspaceCreator {
    /// Create a workspace for `repository` and register it.
    ///
    /// The returned entry is registered, not primary and not locked.
    fn create_workspace(&self, repository: &RepositoryId) -> Result<WorkspaceEntry>;
}

/// Creates workspaces from a local git repository under
/// `<workspace dir>/<project>/ws-<n>`.
pub struct GitCreator {
    /// Repository the workspaces are made from.
    source_repo: PathBuf,
    /// Directory holding this project's workspaces.
    project_dir: PathBuf,
    /// Worktree or clone.
    method: CreateMethod,
    /// Registry new entries are added to.
    registry: Registry,
}

impl GitCreator {
    /// Creator for workspaces of `source_repo` under `workspace_dir`.
    pub fn new(
        source_repo: &Path,
        workspace_dir: &Path,
        method: CreateMethod,
        registry: Registry,
    ) -> Result<Self> {
        let project = project_name(source_repo)?;
        Ok(Self {
            source_repo: source_repo.to_path_buf(),
            project_dir: workspace_dir.join(project),
            method,
            registry,
        })
    }

    /// Exclusively claim the next free `ws-<n>` directory.
    fn claim_directory(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.project_dir).map_err(map_io(&self.project_dir))?;
        let mut index = 1u32;
        loop {
            let candidate = self.project_dir.join(format!("ws-{index}"));
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => index += 1,
                Err(err) => return Err(map_io(&candidate)(err)),
            }
        }
    }

    /// Populate `path` from the source repository.
    fn materialize(&self, path: &Path) -> anyhow::Result<()> {
        match self.method {
            CreateMethod::Worktree => git::create_worktree(&self.source_repo, path)?,
            CreateMethod::Clone => {
                git::clone(&self.source_repo, path)?;
                // Fetch from the real upstream rather than the local source.
                if let Some(url) = git::remote_url(&self.source_repo, "origin")? {
                    git::set_remote_url(path, "origin", &url)?;
                }
            }
        }
        Ok(())
    }
}

impl WorkspaceCreator for GitCreator {
    fn create_workspace(&self, repository: &RepositoryId) -> Result<WorkspaceEntry> {
        let path = self.claim_directory()?;
        if let Err(err) = self.materialize(&path) {
            #[allow(clippy::let_underscore_must_use)]
            let _ = fs::remove_dir_all(&path);
            return Err(BerthError::CreateFailed(format!(
                "{}: {err:#}",
                path.display()
            )));
        }

        if let Err(err) = git::exclude_pattern(&path, &format!("/{LOCK_FILE_NAME}*")) {
            warn!(workspace = %path.display(), error = %err, "failed to exclude lock files from git");
        }

        let path = path.canonicalize().map_err(map_io(&path))?;
        let entry = WorkspaceEntry::new(repository.clone(), path);
        self.registry.add(entry.clone())?;
        info!(workspace = %entry.path.display(), method = ?self.method, "created workspace");
        Ok(entry)
    }
}

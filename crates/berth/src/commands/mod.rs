//! Command implementations and the state they share.

/// `berth list`.
pub mod list;
/// `berth lock` and `berth unlock`.
pub mod lock;
/// `berth primary`, `berth register` and `berth forget`.
pub mod manage;
/// `berth prepare` and the interactive preparation loop.
pub mod prepare;
/// `berth run` and `berth acquire`.
pub mod run;

use std::{
    env,
    io::{self, IsTerminal},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use libberth::{
    Berth, BerthError, Config, GitCreator, PrepareOptions, ReclaimMode, RepositoryId,
    expand_tilde, find_root, identify,
};
use liboutput::Output;

use crate::{args::{Cli, PrepareArgs}, ui::TerminalPrompt};

/// Default directory for the registry, configuration and created workspaces.
const DEFAULT_BERTH_DIR: &str = "~/.berth";

/// Environment variable overriding the berth directory.
const BERTH_DIR_ENV: &str = "BERTH_DIR";

/// Everything a command needs: locations, configuration and the coordinator.
pub struct Session {
    /// Directory holding the registry and global config.
    pub berth_dir: PathBuf,
    /// Root of the current repository, when inside one.
    pub repo_root: Option<PathBuf>,
    /// Global config overlaid with the current repository's config.
    pub config: Config,
    /// Workspace coordinator.
    pub berth: Berth,
    /// User-facing output.
    pub output: Arc<dyn Output>,
    /// Whether prompts may be shown.
    pub interactive: bool,
}

impl Session {
    /// Resolve locations and load configuration for `cli`.
    pub fn open(cli: &Cli, output: Arc<dyn Output>) -> Result<Self> {
        // Priority: CLI flag > env var > default
        let berth_dir = if let Some(dir) = &cli.dir {
            expand_tilde(dir)
        } else if let Ok(env_dir) = env::var(BERTH_DIR_ENV) {
            expand_tilde(&env_dir)
        } else {
            expand_tilde(DEFAULT_BERTH_DIR)
        };

        let repo_root = match &cli.repo_dir {
            Some(dir) => {
                let dir = expand_tilde(dir);
                let root = find_root(&dir).ok_or_else(|| {
                    BerthError::Context(format!("{} is not inside a git repository", dir.display()))
                })?;
                Some(root)
            }
            None => find_root(&env::current_dir().context("Failed to read current directory")?),
        };

        let config = Config::load_layered(&berth_dir, repo_root.as_deref())?;
        let berth = Berth::open(&berth_dir, &config);
        let interactive = !cli.no_prompt && !cli.quiet && io::stdin().is_terminal();

        Ok(Self {
            berth_dir,
            repo_root,
            config,
            berth,
            output,
            interactive,
        })
    }

    /// Root of the current repository, or an error outside one.
    pub fn repo_root(&self) -> Result<&Path> {
        self.repo_root.as_deref().ok_or_else(|| {
            BerthError::Context("Not inside a git repository (use --repo-dir)".to_string()).into()
        })
    }

    /// Identity of the current repository.
    pub fn repository(&self) -> Result<RepositoryId> {
        Ok(identify(self.repo_root()?)?)
    }

    /// Stale lock policy: ask when interactive, reclaim otherwise.
    pub fn reclaim_mode(&self) -> ReclaimMode {
        if self.interactive {
            ReclaimMode::Interactive(Arc::new(TerminalPrompt::new(
                Arc::clone(&self.output),
                self.config.prompt_timeout(),
            )))
        } else {
            ReclaimMode::NonInteractive
        }
    }

    /// Creator for new workspaces of the current repository.
    pub fn creator(&self) -> Result<GitCreator> {
        Ok(GitCreator::new(
            self.repo_root()?,
            &self.config.workspace_dir(&self.berth_dir),
            self.config.create_method(),
            self.berth.registry().clone(),
        )?)
    }

    /// Configuration that applies to `workspace`: the global config overlaid
    /// with the workspace's own `.berth.toml`.
    pub fn workspace_config(&self, workspace: &Path) -> Result<Config> {
        Ok(Config::load_layered(&self.berth_dir, Some(workspace))?)
    }

    /// Preparation options from `args`, falling back to `config`.
    pub fn prepare_options(config: &Config, args: &PrepareArgs) -> PrepareOptions {
        PrepareOptions {
            base_ref: args.base.clone().or_else(|| config.base_ref.clone()),
            branch: args.branch.clone(),
            task_id: args.task.clone(),
            update_commands: if args.no_update {
                Vec::new()
            } else {
                config.update_commands.clone()
            },
            command_timeout: config.command_timeout(),
        }
    }
}

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{BerthError, Result},
    lock::DEFAULT_STALE_THRESHOLD,
    prepare::UpdateCommand,
};

/// Global configuration file name inside the berth directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Per-repository configuration file name at the repository root.
pub const REPO_CONFIG_FILE_NAME: &str = ".berth.toml";

/// Default time to wait for an answer to a stale lock prompt.
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// How new workspaces are materialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateMethod {
    /// `git worktree add`, sharing the object store with the source repository.
    #[default]
    Worktree,
    /// An independent `git clone`.
    Clone,
}

/// Settings read from `config.toml` and `.berth.toml`.
///
/// Every field is optional so that layers can be merged; accessors supply defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where new workspaces are created. Relative paths are resolved against the berth directory.
    pub workspace_dir: Option<PathBuf>,
    /// Age in hours after which a lock is stale.
    pub stale_after_hours: Option<u64>,
    /// Seconds to wait for an answer to a stale lock prompt.
    pub prompt_timeout_secs: Option<u64>,
    /// Default timeout for update commands, in seconds.
    pub command_timeout_secs: Option<u64>,
    /// Default base reference for preparation.
    pub base_ref: Option<String>,
    /// How new workspaces are created.
    pub create_method: Option<CreateMethod>,
    /// Commands run after every sync.
    pub update_commands: Vec<UpdateCommand>,
}

impl Config {
    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config_error = |message: String| BerthError::Config {
            path: path.to_path_buf(),
            message,
        };
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(config_error(err.to_string())),
        };
        toml::from_str(&contents).map_err(|e| config_error(e.to_string()))
    }

    /// Load the global config from `berth_dir`, overlaid with the repository's
    /// `.berth.toml` when `repo_root` is given.
    pub fn load_layered(berth_dir: &Path, repo_root: Option<&Path>) -> Result<Self> {
        let global = Self::load(&berth_dir.join(CONFIG_FILE_NAME))?;
        match repo_root {
            Some(root) => Ok(global.merge(Self::load(&root.join(REPO_CONFIG_FILE_NAME))?)),
            None => Ok(global),
        }
    }

    /// Overlay `other` on `self`. Set fields in `other` win; a non-empty
    /// command list replaces ours.
    pub fn merge(self, other: Self) -> Self {
        Self {
            workspace_dir: other.workspace_dir.or(self.workspace_dir),
            stale_after_hours: other.stale_after_hours.or(self.stale_after_hours),
            prompt_timeout_secs: other.prompt_timeout_secs.or(self.prompt_timeout_secs),
            command_timeout_secs: other.command_timeout_secs.or(self.command_timeout_secs),
            base_ref: other.base_ref.or(self.base_ref),
            create_method: other.create_method.or(self.create_method),
            update_commands: if other.update_commands.is_empty() {
                self.update_commands
            } else {
                other.update_commands
            },
        }
    }

    /// Lock age after which a lock is stale.
    pub fn stale_threshold(&self) -> Duration {
        self.stale_after_hours
            .map_or(DEFAULT_STALE_THRESHOLD, |hours| {
                Duration::from_secs(hours.saturating_mul(3600))
            })
    }

    /// How long to wait for an answer to a stale lock prompt.
    pub fn prompt_timeout(&self) -> Duration {
        self.prompt_timeout_secs
            .map_or(DEFAULT_PROMPT_TIMEOUT, Duration::from_secs)
    }

    /// Default update command timeout.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Creation method, defaulting to worktrees.
    pub fn create_method(&self) -> CreateMethod {
        self.create_method.unwrap_or_default()
    }

    /// Directory that holds created workspaces.
    pub fn workspace_dir(&self, berth_dir: &Path) -> PathBuf {
        match &self.workspace_dir {
            Some(dir) => {
                let dir = expand_tilde(&dir.to_string_lossy());
                if dir.is_absolute() {
                    dir
                } else {
                    berth_dir.join(dir)
                }
            }
            None => berth_dir.join("workspaces"),
        }
    }
}

/// Expand a leading `~` in a filesystem path using the `HOME` environment variable.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~")
        && let Ok(home) = env::var("HOME")
    {
        return PathBuf::from(path.replacen("~", &home, 1));
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_layered(dir.path(), Some(dir.path())).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.stale_threshold(), DEFAULT_STALE_THRESHOLD);
        assert_eq!(config.prompt_timeout(), Duration::from_secs(60));
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.create_method(), CreateMethod::Worktree);
        assert_eq!(config.workspace_dir(dir.path()), dir.path().join("workspaces"));
    }

    #[test]
    fn test_repository_config_overrides_global() {
        let berth_dir = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        fs::write(
            berth_dir.path().join(CONFIG_FILE_NAME),
            r#"
                stale_after_hours = 12
                base_ref = "main"
                workspace_dir = "spaces"

                [[update_commands]]
                title = "global"
                command = "true"
            "#,
        )
        .unwrap();
        fs::write(
            repo.path().join(REPO_CONFIG_FILE_NAME),
            r#"
                base_ref = "develop"
                create_method = "clone"

                [[update_commands]]
                title = "install"
                command = "npm ci"

                [[update_commands]]
                title = "lint"
                command = "npm run lint"
                allow_failure = true
                timeout_secs = 300
            "#,
        )
        .unwrap();

        let config = Config::load_layered(berth_dir.path(), Some(repo.path())).unwrap();

        assert_eq!(config.stale_threshold(), Duration::from_secs(12 * 3600));
        assert_eq!(config.base_ref.as_deref(), Some("develop"));
        assert_eq!(config.create_method(), CreateMethod::Clone);
        assert_eq!(
            config.workspace_dir(berth_dir.path()),
            berth_dir.path().join("spaces")
        );
        let titles: Vec<_> = config
            .update_commands
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, ["install", "lint"]);
        assert!(config.update_commands[1].allow_failure);
        assert_eq!(config.update_commands[1].timeout_secs, Some(300));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "stale_after = 3\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, BerthError::Config { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_expand_tilde() {
        let Ok(home) = env::var("HOME") else {
            return;
        };
        assert_eq!(expand_tilde("~/berth"), PathBuf::from(format!("{home}/berth")));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}

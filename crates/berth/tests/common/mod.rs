#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, ensure};
use tempfile::TempDir;

/// Return the path to the compiled `berth` binary for integration-style tests.
pub fn berth_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_berth"))
}

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Initialise a new repository at `repo_path` with a README commit.
pub fn init_repository(repo_path: &Path) -> Result<()> {
    fs::create_dir_all(repo_path)?;
    git(repo_path, &["init"])?;
    git(repo_path, &["config", "user.email", "test@example.com"])?;
    git(repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("README.md"), "# Test Project")?;
    git(repo_path, &["add", "README.md"])?;
    git(repo_path, &["commit", "-m", "Initial commit"])?;
    Ok(())
}

/// A local upstream, a checkout of it and an empty berth directory.
pub struct Project {
    /// Keeps the directories alive.
    pub temp_dir: TempDir,
    /// Repository the checkout was cloned from; serves as `origin`.
    pub upstream: PathBuf,
    /// Checkout berth is run from.
    pub repo: PathBuf,
    /// Berth state directory.
    pub berth_dir: PathBuf,
}

impl Project {
    /// Create the upstream and clone it as `widget`.
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let upstream = temp_dir.path().join("upstream");
        init_repository(&upstream)?;
        let repo = temp_dir.path().join("widget");
        clone(&upstream, &repo)?;
        let berth_dir = temp_dir.path().join("berth");
        Ok(Self {
            temp_dir,
            upstream,
            repo,
            berth_dir,
        })
    }

    /// Another checkout of the upstream at `name`, sharing the repository identity.
    pub fn checkout(&self, name: &str) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(name);
        clone(&self.upstream, &path)?;
        Ok(path.canonicalize()?)
    }

    /// A `berth` command run from the checkout without prompts.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(berth_binary());
        cmd.current_dir(&self.repo);
        cmd.env_remove("BERTH_DIR");
        cmd.arg("--dir").arg(&self.berth_dir);
        cmd.arg("--no-prompt");
        cmd
    }

    /// Run `berth` with `args`, returning the command output.
    pub fn berth(&self, args: &[&str]) -> Result<Output> {
        self.command()
            .args(args)
            .output()
            .with_context(|| format!("failed to run berth {}", args.join(" ")))
    }

    /// Run `berth` with `args`, failing unless it succeeds.
    pub fn berth_ok(&self, args: &[&str]) -> Result<Output> {
        let output = self.berth(args)?;
        ensure!(
            output.status.success(),
            "berth {} failed ({:?})\nstdout: {}\nstderr: {}",
            args.join(" "),
            output.status.code(),
            stdout(&output),
            stderr(&output)
        );
        Ok(output)
    }

    /// Directory created workspaces live in.
    pub fn workspace(&self, name: &str) -> PathBuf {
        self.berth_dir.join("workspaces").join("widget").join(name)
    }

    /// Write the global berth configuration.
    pub fn write_config(&self, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.berth_dir)?;
        fs::write(self.berth_dir.join("config.toml"), contents)?;
        Ok(())
    }
}

/// Clone `source` into `destination`.
pub fn clone(source: &Path, destination: &Path) -> Result<()> {
    let parent = destination.parent().context("destination has no parent")?;
    git(
        parent,
        &[
            "clone",
            "--quiet",
            &source.to_string_lossy(),
            &destination.to_string_lossy(),
        ],
    )?;
    git(destination, &["config", "user.email", "test@example.com"])?;
    git(destination, &["config", "user.name", "Test User"])?;
    Ok(())
}

/// Path of the lock file in `workspace`.
pub fn lock_file(workspace: &Path) -> PathBuf {
    workspace.join(".berth.lock")
}

/// Captured stdout as text.
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Captured stderr as text.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// The path printed on stdout by `acquire` or `lock`.
pub fn printed_path(output: &Output) -> PathBuf {
    PathBuf::from(stdout(output).trim())
}

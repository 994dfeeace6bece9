use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::lock::LOCK_FILE_NAME;

/// Candidate trunk references, in order of preference.
const FALLBACK_TARGETS: &[&str] = &["origin/main", "origin/master", "main", "master"];

/// Run a git command with the given arguments in the specified directory.
/// Returns the output if successful, otherwise returns an error with the full command details.
fn run_git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let command = format!("git {}", args.join(" "));
        anyhow::bail!("Git command failed: {}\nError: {}", command, stderr.trim());
    }

    Ok(output)
}

/// Run a git query whose failure means "no answer" rather than an error.
fn query_git(repo_path: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute git command: git {}", args.join(" ")))?;

    if !output.status.success() {
        return Ok(None);
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!value.is_empty()).then_some(value))
}

/// Walk up from `start_dir` to find the nearest repository root containing a `.git` entry.
pub fn find_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Whether a `git status --porcelain` line refers to berth's own lock artifacts.
fn is_lock_artifact(line: &str) -> bool {
    line.get(3..)
        .map(|path| path.trim_matches('"').starts_with(LOCK_FILE_NAME))
        .unwrap_or(false)
}

/// Check whether the repository has staged, unstaged or untracked changes,
/// ignoring berth's lock files.
pub fn has_uncommitted_changes(repo_path: &Path) -> Result<bool> {
    let output = run_git(repo_path, &["status", "--porcelain"])?;
    let status_output = String::from_utf8_lossy(&output.stdout);
    Ok(status_output
        .lines()
        .any(|line| !line.trim().is_empty() && !is_lock_artifact(line)))
}

/// Determine if a remote named `name` is configured.
pub fn has_remote(repo_path: &Path, name: &str) -> Result<bool> {
    let output = run_git(repo_path, &["remote"])?;
    let remotes = String::from_utf8_lossy(&output.stdout);
    Ok(remotes.lines().any(|remote| remote.trim() == name))
}

/// The URL configured for remote `name`, if any.
pub fn remote_url(repo_path: &Path, name: &str) -> Result<Option<String>> {
    query_git(
        repo_path,
        &["config", "--get", &format!("remote.{name}.url")],
    )
}

/// Fetch branches and tags from `remote`.
pub fn fetch(repo_path: &Path, remote: &str) -> Result<()> {
    run_git(repo_path, &["fetch", "--quiet", "--tags", remote])?;
    Ok(())
}

/// Resolve `rev` to a commit hash, or `None` if it does not name a commit.
pub fn resolve_commit(repo_path: &Path, rev: &str) -> Result<Option<String>> {
    query_git(
        repo_path,
        &["rev-parse", "--verify", "--quiet", &format!("{rev}^{{commit}}")],
    )
}

/// The default trunk reference: `origin/HEAD` when set, otherwise the first
/// existing fallback target.
pub fn default_trunk(repo_path: &Path) -> Result<String> {
    if let Some(head) = query_git(
        repo_path,
        &["symbolic-ref", "--quiet", "refs/remotes/origin/HEAD"],
    )? && let Some(short) = head.strip_prefix("refs/remotes/")
    {
        return Ok(short.to_string());
    }

    for target in FALLBACK_TARGETS {
        if resolve_commit(repo_path, target)?.is_some() {
            return Ok((*target).to_string());
        }
    }

    anyhow::bail!(
        "Could not determine the default trunk (tried origin/HEAD, {})",
        FALLBACK_TARGETS.join(", ")
    )
}

/// Resolve a base reference to a commit.
///
/// Branch names prefer the freshly fetched `origin/<name>` over a local
/// branch of the same name. Without a base, the default trunk is used.
pub fn resolve_base(repo_path: &Path, base: Option<&str>, prefer_origin: bool) -> Result<String> {
    let Some(base) = base else {
        let trunk = default_trunk(repo_path)?;
        return resolve_commit(repo_path, &trunk)?
            .with_context(|| format!("Trunk reference '{trunk}' does not name a commit"));
    };

    if prefer_origin
        && !base.starts_with("origin/")
        && let Some(commit) = resolve_commit(repo_path, &format!("origin/{base}"))?
    {
        return Ok(commit);
    }

    resolve_commit(repo_path, base)?
        .with_context(|| format!("Base reference '{base}' does not name a commit"))
}

/// Check out `commit` with a detached HEAD.
pub fn checkout_detached(repo_path: &Path, commit: &str) -> Result<()> {
    run_git(repo_path, &["checkout", "--quiet", "--detach", commit])?;
    Ok(())
}

/// Create or reset `branch` at `commit` and check it out.
pub fn checkout_branch(repo_path: &Path, branch: &str, commit: &str) -> Result<()> {
    run_git(repo_path, &["checkout", "--quiet", "-B", branch, commit])?;
    Ok(())
}

/// The commit currently checked out.
#[cfg(test)]
pub fn head_commit(repo_path: &Path) -> Result<String> {
    let output = run_git(repo_path, &["rev-parse", "HEAD"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Create a detached worktree of `repo_path` at `worktree_path`.
pub fn create_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
    let worktree_path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid worktree path"))?;

    run_git(
        repo_path,
        &["worktree", "add", "--quiet", "--detach", worktree_path_str],
    )?;

    Ok(())
}

/// Clone `source` into `destination`, which must be missing or empty.
pub fn clone(source: &Path, destination: &Path) -> Result<()> {
    let source_str = source
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid source path"))?;
    let destination_str = destination
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid destination path"))?;
    let parent = destination
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination has no parent directory"))?;

    run_git(parent, &["clone", "--quiet", source_str, destination_str])?;
    Ok(())
}

/// Point remote `name` at `url`.
pub fn set_remote_url(repo_path: &Path, name: &str, url: &str) -> Result<()> {
    run_git(repo_path, &["remote", "set-url", name, url])?;
    Ok(())
}

/// Add `pattern` to the repository's `info/exclude` unless already present.
pub fn exclude_pattern(repo_path: &Path, pattern: &str) -> Result<()> {
    let output = run_git(repo_path, &["rev-parse", "--git-common-dir"])?;
    let common_dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    let common_dir = if common_dir.is_absolute() {
        common_dir
    } else {
        repo_path.join(common_dir)
    };

    let info_dir = common_dir.join("info");
    let exclude_path = info_dir.join("exclude");
    let existing = fs::read_to_string(&exclude_path).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == pattern) {
        return Ok(());
    }

    fs::create_dir_all(&info_dir)
        .with_context(|| format!("Failed to create {}", info_dir.display()))?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude_path)
        .with_context(|| format!("Failed to open {}", exclude_path.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{pattern}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{commit_file, git, init_repo};
    use tempfile::TempDir;

    fn setup_test_repo() -> Result<(TempDir, PathBuf)> {
        let temp_dir = TempDir::new()?;
        let repo_path = init_repo(&temp_dir.path().join("repo"));
        Ok((temp_dir, repo_path))
    }

    #[test]
    fn test_has_uncommitted_changes_clean_repo() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        assert!(!has_uncommitted_changes(&repo_path)?);
        Ok(())
    }

    #[test]
    fn test_has_uncommitted_changes_modified_file() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        fs::write(repo_path.join("README.md"), "modified content")?;
        assert!(has_uncommitted_changes(&repo_path)?);
        Ok(())
    }

    #[test]
    fn test_has_uncommitted_changes_untracked_file() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        fs::write(repo_path.join("untracked.txt"), "new file")?;
        assert!(has_uncommitted_changes(&repo_path)?);
        Ok(())
    }

    #[test]
    fn test_has_uncommitted_changes_ignores_lock_files() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        fs::write(repo_path.join(LOCK_FILE_NAME), "{}")?;
        fs::write(repo_path.join(format!("{LOCK_FILE_NAME}.tmp123")), "{}")?;
        assert!(!has_uncommitted_changes(&repo_path)?);

        fs::write(repo_path.join("other.txt"), "x")?;
        assert!(has_uncommitted_changes(&repo_path)?);
        Ok(())
    }

    #[test]
    fn test_find_root() -> Result<()> {
        let (temp_dir, root_path) = setup_test_repo()?;

        let nested_dir = root_path.join("src").join("nested");
        fs::create_dir_all(&nested_dir)?;

        assert_eq!(find_root(&root_path), Some(root_path.clone()));
        assert_eq!(find_root(&nested_dir), Some(root_path.clone()));
        assert_eq!(find_root(temp_dir.path()), None);

        Ok(())
    }

    #[test]
    fn test_default_trunk_without_remote() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        assert_eq!(default_trunk(&repo_path)?, "main");
        Ok(())
    }

    #[test]
    fn test_default_trunk_uses_origin_head() -> Result<()> {
        let (temp_dir, upstream) = setup_test_repo()?;
        let clone_path = temp_dir.path().join("clone");
        clone(&upstream, &clone_path)?;

        assert_eq!(default_trunk(&clone_path)?, "origin/main");
        assert!(has_remote(&clone_path, "origin")?);
        assert!(remote_url(&clone_path, "origin")?.is_some());
        assert_eq!(remote_url(&upstream, "origin")?, None);
        Ok(())
    }

    #[test]
    fn test_resolve_base_forms() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        let first = head_commit(&repo_path)?;
        git(&repo_path, &["tag", "v1"]);
        let second = commit_file(&repo_path, "two.txt", "2", "Second commit");

        assert_eq!(resolve_base(&repo_path, None, false)?, second);
        assert_eq!(resolve_base(&repo_path, Some("main"), false)?, second);
        assert_eq!(resolve_base(&repo_path, Some("v1"), false)?, first);
        assert_eq!(resolve_base(&repo_path, Some(&first[..10]), false)?, first);
        assert!(resolve_base(&repo_path, Some("no-such-ref"), false).is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_base_prefers_fetched_origin_branch() -> Result<()> {
        let (temp_dir, upstream) = setup_test_repo()?;
        let clone_path = temp_dir.path().join("clone");
        clone(&upstream, &clone_path)?;
        let newer = commit_file(&upstream, "new.txt", "new", "Upstream change");

        fetch(&clone_path, "origin")?;
        // The local `main` is behind; the base resolves to origin/main.
        assert_ne!(resolve_commit(&clone_path, "main")?, Some(newer.clone()));
        assert_eq!(resolve_base(&clone_path, Some("main"), true)?, newer);
        Ok(())
    }

    #[test]
    fn test_checkout_detached_and_branch() -> Result<()> {
        let (_temp_dir, repo_path) = setup_test_repo()?;
        let first = head_commit(&repo_path)?;
        commit_file(&repo_path, "two.txt", "2", "Second commit");

        checkout_detached(&repo_path, &first)?;
        assert_eq!(head_commit(&repo_path)?, first);
        assert!(query_git(&repo_path, &["symbolic-ref", "--quiet", "HEAD"])?.is_none());

        checkout_branch(&repo_path, "task/one", &first)?;
        assert_eq!(
            query_git(&repo_path, &["symbolic-ref", "--short", "HEAD"])?,
            Some("task/one".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_create_worktree_detached() -> Result<()> {
        let (temp_dir, repo_path) = setup_test_repo()?;
        let worktree_path = temp_dir.path().join("ws-1");
        fs::create_dir(&worktree_path)?;

        create_worktree(&repo_path, &worktree_path)?;

        assert!(worktree_path.join("README.md").exists());
        assert_eq!(head_commit(&worktree_path)?, head_commit(&repo_path)?);
        Ok(())
    }

    #[test]
    fn test_exclude_pattern_is_idempotent() -> Result<()> {
        let (temp_dir, repo_path) = setup_test_repo()?;
        let worktree_path = temp_dir.path().join("ws-1");
        create_worktree(&repo_path, &worktree_path)?;

        exclude_pattern(&worktree_path, ".berth.lock*")?;
        exclude_pattern(&worktree_path, ".berth.lock*")?;

        let exclude = fs::read_to_string(repo_path.join(".git/info/exclude"))?;
        assert_eq!(
            exclude
                .lines()
                .filter(|line| *line == ".berth.lock*")
                .count(),
            1
        );
        Ok(())
    }
}

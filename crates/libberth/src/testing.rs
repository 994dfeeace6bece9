//! Shared fixtures for unit tests.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use crate::lock::{LockRecord, ProcessProbe, lock_path};

/// Hostname reported by [`FakeProbe`].
pub const TEST_HOST: &str = "test-host";

/// Probe with a fixed hostname and a fixed set of live pids.
pub struct FakeProbe {
    /// Pids reported as alive.
    alive: HashSet<u32>,
}

impl FakeProbe {
    /// A probe where exactly `pids` are alive.
    pub fn alive(pids: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            alive: pids.iter().copied().collect(),
        })
    }
}

impl ProcessProbe for FakeProbe {
    fn hostname(&self) -> String {
        TEST_HOST.to_string()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }
}

/// Write `record` as the lock file of `workspace`, bypassing the lock manager.
pub fn write_record(workspace: &Path, record: &LockRecord) {
    fs::write(
        lock_path(workspace),
        serde_json::to_vec_pretty(record).unwrap(),
    )
    .unwrap();
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository on `main` with one commit and return its root.
pub fn init_repo(dir: &Path) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    commit_file(dir, "README.md", "hello\n", "Initial commit");
    dir.to_path_buf()
}

/// Write and commit a file, returning the new HEAD commit.
pub fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) -> String {
    fs::write(dir.join(name), contents).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

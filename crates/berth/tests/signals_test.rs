// Integration tests are compiled as a separate crate, so these lints don't apply
#![allow(clippy::tests_outside_test_module)]
#![allow(missing_docs)]

mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use common::{Project, lock_file};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};

/// Wait until `check` holds, failing after a few seconds.
fn wait_for(mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        if Instant::now() > deadline {
            bail!("condition not met in time");
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

#[test]
fn test_sigterm_releases_lock() -> Result<()> {
    let project = Project::new()?;
    let mut child = project.command().args(["run", "--", "sleep", "10"]).spawn()?;

    let lock = lock_file(&project.workspace("ws-1"));
    wait_for(|| lock.exists())?;

    let pid = Pid::from_raw(i32::try_from(child.id())?);
    kill(pid, Signal::SIGTERM)?;
    let status = child.wait()?;

    assert_eq!(status.code(), Some(128 + Signal::SIGTERM as i32));
    assert!(!lock.exists(), "lock should be removed on termination");
    Ok(())
}

#[test]
fn test_sigterm_stops_command_before_release() -> Result<()> {
    let project = Project::new()?;
    let mut child = project
        .command()
        .args(["run", "--", "sh", "-c", "touch started; sleep 2; touch late_write"])
        .spawn()?;

    let workspace = project.workspace("ws-1");
    wait_for(|| workspace.join("started").exists())?;

    let pid = Pid::from_raw(i32::try_from(child.id())?);
    kill(pid, Signal::SIGTERM)?;
    let status = child.wait()?;

    assert_eq!(status.code(), Some(128 + Signal::SIGTERM as i32));
    assert!(!lock_file(&workspace).exists());

    // Outlast the command's own schedule: nothing may write to the released
    // workspace.
    thread::sleep(Duration::from_secs(3));
    assert!(
        !workspace.join("late_write").exists(),
        "command kept running after its lock was released"
    );
    Ok(())
}

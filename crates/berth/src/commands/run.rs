use std::{
    env, io,
    path::Path,
    process::{Command, ExitStatus},
};

use anyhow::Result;
use libberth::{BerthError, Holder, Lease, PrepareOptions, defer_interrupts, track_foreground};

use crate::{
    args::PrepareArgs,
    commands::{
        Session,
        prepare::{Prepared, prepare_interactively},
    },
    ui::emit,
};

/// Environment variable naming the workspace a command runs in.
const WORKSPACE_ENV: &str = "BERTH_WORKSPACE";

/// Select, lock and prepare a workspace of the current repository for `holder`.
///
/// Workspaces the user passes over stay locked until one is chosen, so they
/// are not offered again.
pub fn acquire_prepared(
    session: &Session,
    holder: &Holder,
    options: &PrepareOptions,
) -> Result<Lease> {
    let repository = session.repository()?;
    let creator = session.creator()?;
    let mode = session.reclaim_mode();
    let output = session.output.as_ref();
    let mut passed_over = Vec::new();

    let chosen = loop {
        let spinner = output.spinner("Selecting workspace...");
        let lease = match session
            .berth
            .select_or_create(&repository, &creator, holder, &mode)
        {
            Ok(lease) => lease,
            Err(err) => {
                spinner.finish_fail("No workspace available");
                return Err(err.into());
            }
        };
        let verb = if lease.created { "Created" } else { "Reusing" };
        spinner.finish_success(&format!("{verb} {}", lease.entry.path.display()));

        match prepare_interactively(session, &lease.lock, options, true) {
            Ok(Prepared::Ready) => break lease,
            Ok(Prepared::ChooseAnother) => passed_over.push(lease),
            Err(err) => {
                session.berth.release(lease.lock)?;
                return Err(err);
            }
        }
    };

    for lease in passed_over {
        session.berth.release(lease.lock)?;
    }
    Ok(chosen)
}

/// Run the `berth run` command logic.
pub fn run(session: &Session, args: &PrepareArgs, command: &[String]) -> Result<()> {
    let description = if command.is_empty() {
        "berth run".to_string()
    } else {
        format!("berth run -- {}", command.join(" "))
    };
    let holder = Holder::current(description);
    let options = Session::prepare_options(&session.config, args);

    let lease = acquire_prepared(session, &holder, &options)?;
    let workspace = lease.entry.path.clone();
    let status = run_in_workspace(&workspace, command);
    session.berth.release(lease.lock)?;
    emit(session.output.message(&format!("Released {}", workspace.display())))?;

    let status = status?;
    if !status.success() {
        return Err(BerthError::CommandExit {
            code: status.code().unwrap_or(1),
        }
        .into());
    }
    Ok(())
}

/// Run the `berth acquire` command logic.
///
/// The lock is recorded for the calling shell and outlives this process;
/// the workspace path is printed on stdout.
pub fn acquire(session: &Session, args: &PrepareArgs) -> Result<()> {
    let holder = Holder::parent_process("berth acquire");
    let options = Session::prepare_options(&session.config, args);

    let lease = acquire_prepared(session, &holder, &options)?;
    let record = lease.lock.keep();
    emit(session.output.success(&format!(
        "Locked {} for pid {}",
        lease.entry.path.display(),
        record.pid
    )))?;
    println!("{}", lease.entry.path.display());
    Ok(())
}

/// Run `command` (or an interactive shell) inside `workspace`.
fn run_in_workspace(workspace: &Path, command: &[String]) -> Result<ExitStatus> {
    let mut child = match command.split_first() {
        None => {
            let shell = env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
            Command::new(shell)
        }
        Some((program, args)) => {
            let mut child = Command::new(program);
            child.args(args);
            child
        }
    };
    child.current_dir(workspace).env(WORKSPACE_ENV, workspace);

    // The child decides what an interrupt means while it runs.
    let _deferral = defer_interrupts();
    let mut child = match child.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(BerthError::CommandExit { code: 127 }.into());
        }
        Err(err) => {
            return Err(BerthError::Context(format!("Failed to run command: {err}")).into());
        }
    };
    let _foreground = track_foreground(child.id());
    child
        .wait()
        .map_err(|err| BerthError::Context(format!("Failed to wait for command: {err}")).into())
}

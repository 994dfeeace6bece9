#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for coordinating workspaces via the libberth crate.

/// Command-line arguments.
mod args;
/// Command implementations.
mod commands;
/// Diagnostic logging setup.
mod logging;
/// Prompts and rendering shared by commands.
mod ui;

use std::{
    io::{self, IsTerminal, Write},
    process,
    sync::Arc,
};

use anyhow::Result;
use clap::Parser;
use libberth::{BerthError, expand_tilde};
use liboutput::{Output, Quiet, Terminal};

use crate::{
    args::{Cli, Commands},
    commands::Session,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Listings go to stdout; everything else keeps stdout for paths.
    let to_stdout = matches!(cli.command, Commands::List { .. });
    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else if to_stdout {
        io::stdout().is_terminal()
    } else {
        io::stderr().is_terminal()
    };

    let output: Arc<dyn Output> = if cli.quiet {
        Arc::new(Quiet)
    } else if to_stdout {
        Arc::new(Terminal::new(color))
    } else {
        Arc::new(Terminal::stderr(color))
    };

    if let Err(e) = run(&cli, &output) {
        if color && io::stderr().is_terminal() {
            eprint!("\x1b[0m");
            if let Err(flush_err) = io::stderr().flush() {
                eprintln!("Failed to flush stderr while resetting colors: {flush_err}");
            }
        }

        let exit_code = match e.downcast_ref::<BerthError>() {
            Some(err @ BerthError::CommandExit { .. }) => err.exit_code(),
            Some(err @ BerthError::UserAborted) => {
                if let Err(finish_err) = output.finish() {
                    eprintln!("Failed to flush output handler: {finish_err:#}");
                }
                err.exit_code()
            }
            Some(err) => {
                report(output.as_ref(), &e);
                err.exit_code()
            }
            None => {
                report(output.as_ref(), &e);
                1
            }
        };

        process::exit(exit_code);
    }

    Ok(())
}

/// Show `err` through the output handler.
fn report(output: &dyn Output, err: &anyhow::Error) {
    if let Err(display_err) = output.fail(&format!("{err:#}")) {
        eprintln!("Failed to report error via output handler: {display_err:#}");
    }
    if let Err(finish_err) = output.finish() {
        eprintln!("Failed to flush output handler: {finish_err:#}");
    }
}

/// Open a session and dispatch the selected command.
fn run(cli: &Cli, output: &Arc<dyn Output>) -> Result<()> {
    let session = Session::open(cli, Arc::clone(output))?;

    libberth::release_on_termination(session.berth.locks().held())?;

    match &cli.command {
        Commands::Run { prepare, command } => commands::run::run(&session, prepare, command)?,
        Commands::Acquire { prepare } => commands::run::acquire(&session, prepare)?,
        Commands::Lock { path } => commands::lock::lock(&session, &expand_tilde(path))?,
        Commands::Unlock { path, force } => {
            commands::lock::unlock(&session, &expand_tilde(path), *force)?;
        }
        Commands::Prepare { path, prepare } => {
            commands::prepare::prepare(&session, &expand_tilde(path), prepare)?;
        }
        Commands::Primary { path, unset } => {
            commands::manage::primary(&session, &expand_tilde(path), *unset)?;
        }
        Commands::List { all } => commands::list::list(&session, *all)?,
        Commands::Register { path, primary } => {
            commands::manage::register(&session, &expand_tilde(path), *primary)?;
        }
        Commands::Forget { path } => commands::manage::forget(&session, &expand_tilde(path))?,
    }

    output.finish()?;
    Ok(())
}

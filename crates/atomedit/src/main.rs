#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for applying atomic edit batches via the libatomedit crate.

use std::{
    env,
    io::{self, IsTerminal, Write},
    path::PathBuf,
    process,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use libatomedit::{MutationEngine, MutationError, find_root};
use tracing_subscriber::EnvFilter;

/// Command-line argument definitions.
mod args;
/// Edit batch files.
mod batch;
/// Subcommand implementations.
mod commands;
/// Terminal output abstractions and implementations.
mod output;
/// Rendering helpers shared by commands.
mod ui;

use args::{Cli, Commands};
use output::{Output, Quiet, Terminal};
use ui::{ValidationFailed, error_json};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "ATOMEDIT_LOG";

/// Install the stderr log subscriber, filtered by `ATOMEDIT_LOG`.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Resolve the repository root from the flag or the working directory.
fn repo_root(repo_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = repo_dir {
        return Ok(dir);
    }
    let current_dir = env::current_dir()?;
    find_root(&current_dir).with_context(|| {
        format!(
            "No git repository found at or above {}; pass --repo-dir",
            current_dir.display()
        )
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    // Determine color output preference early for error handling
    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let output: Arc<dyn Output> = if cli.quiet {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    };
    let json = cli.json;

    if let Err(e) = run(cli, output.as_ref()) {
        // Reset any existing colors only if color was enabled and stdout is a TTY
        if color && io::stdout().is_terminal() {
            print!("\x1b[0m");
            if let Err(flush_err) = io::stdout().flush() {
                eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
            }
        }

        let validation = e.downcast_ref::<ValidationFailed>();
        let exit_code = match (e.downcast_ref::<MutationError>(), validation) {
            (Some(err), _) => err.exit_code(),
            (None, Some(failed)) => failed.code,
            (None, None) => 1,
        };

        // Validation failures have already been reported in full.
        if validation.is_none() {
            if json {
                if let Err(print_err) = ui::print_json(&error_json(&e)) {
                    eprintln!("Failed to print error: {print_err:#}");
                }
            } else if let Err(display_err) = output.fail(&format!("{e:#}")) {
                eprintln!("Failed to report error via output handler: {display_err:#}");
            }
        }
        if let Err(finish_err) = output.finish() {
            eprintln!("Failed to flush output handler: {finish_err:#}");
        }

        process::exit(exit_code);
    }
    Ok(())
}

/// Dispatch a parsed command line.
fn run(cli: Cli, output: &dyn Output) -> Result<()> {
    let root = repo_root(cli.repo_dir)?;

    match cli.command {
        Commands::Apply { batch, dry_run } => {
            let engine = MutationEngine::open(&root)?;
            commands::apply(&engine, output, &batch, dry_run, cli.json)?;
        }
        Commands::Validate { batch } => {
            let engine = MutationEngine::open(&root)?;
            commands::validate(&engine, output, &batch, cli.json)?;
        }
        Commands::Hash { paths } => {
            commands::hash(&root, output, &paths, cli.json)?;
        }
    }

    output.finish()?;
    Ok(())
}

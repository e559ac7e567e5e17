use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for atomedit.
pub struct Cli {
    /// Override the repository directory (defaults to current git project)
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_dir: Option<PathBuf>,

    /// Enable colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    /// The primary command to execute.
    pub command: Commands,
}

#[derive(Subcommand)]
/// CLI subcommands supported by atomedit.
pub enum Commands {
    /// Apply a batch of edits atomically
    Apply {
        /// TOML file holding `[[edits]]` and optional `[preconditions]`
        batch: PathBuf,

        /// Check, lock and estimate without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Check a batch without locking or writing
    Validate {
        /// TOML file holding `[[edits]]` and optional `[preconditions]`
        batch: PathBuf,
    },

    /// Print content hashes for use as preconditions
    Hash {
        /// Repository-relative paths to hash
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

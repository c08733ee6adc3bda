//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Quire incremental documentation builder CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: quire.toml)
    #[arg(short = 'C', long, default_value = "quire.toml")]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Build arguments
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Write all documents, not only the outdated ones
    #[arg(short, long, conflicts_with = "files")]
    pub all: bool,

    /// Ignore the saved environment and read every source file
    #[arg(short = 'E', long)]
    pub fresh_env: bool,

    /// Number of parallel workers for reading and writing
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Turn warnings into errors
    #[arg(short = 'W', long)]
    pub warnings_fatal: bool,

    /// Only write these source files (paths relative to the current directory)
    pub files: Vec<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read outdated sources and write what changed
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Remove the output and doctree directories
    Clean,
}

impl Cli {
    pub const fn is_clean(&self) -> bool {
        matches!(self.command, Commands::Clean)
    }
}

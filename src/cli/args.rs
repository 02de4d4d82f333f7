//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// leafcache - node-local compute cache for the LeafScan pipeline
///
/// Stores job artifacts, runs the leaf-area stages when their inputs are
/// complete and keeps the remote store in sync.
#[derive(Parser, Debug)]
#[command(name = "leafcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LEAFCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit inputs for a job and run its stages
    Run(RunArgs),

    /// Show flags and stage states of a job
    Status(StatusArgs),

    /// Request the defoliation result of a job
    Fetch(FetchArgs),

    /// Evict jobs until the cache fits its byte budget
    Gc,

    /// Drop derived state of a job, keeping its raw inputs
    Reset(ResetArgs),

    /// Wipe the local cache
    Clear(ClearArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Job identifier
    pub entry: String,

    /// Scan video to store for this job
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// Number of leaves on the plant
    #[arg(long)]
    pub leaf_number: Option<u32>,

    /// Measured leaf widths (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub leaf_widths: Vec<f64>,

    /// Scanned leaf length
    #[arg(long)]
    pub length: Option<f64>,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job identifier
    pub entry: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Job identifier
    pub entry: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Job identifier
    pub entry: String,
}

/// Arguments for the clear command
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Also reset the remote store
    #[arg(long)]
    pub remote: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

//! CLI argument definitions using clap derive

use crate::controller::PolicyKind;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// rmk - incremental build orchestrator
///
/// Builds the jobs declared in build.toml, reusing results that are
/// still current.
#[derive(Parser, Debug)]
#[command(name = "rmk")]
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
    #[arg(short, long, global = true, env = "RMK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a task
    Build(BuildArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Task to build (default: from config, usually "all")
    pub task: Option<String>,

    /// Directory containing the build file
    #[arg(short = 'C', long = "directory", value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Maximum number of jobs running at once
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Rebuild policy
    #[arg(short, long, value_enum)]
    pub policy: Option<PolicyKind>,

    /// Remote cache base URL (used by --policy remote)
    #[arg(long, value_name = "URL")]
    pub remote: Option<String>,

    /// Build file name to look for
    #[arg(short, long, value_name = "NAME")]
    pub file: Option<String>,

    /// Do not echo command lines
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
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

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.concurrency)
        key: String,
        /// Value to set
        value: String,
    },
}

//! Configuration schema for rmk
//!
//! Configuration is stored at `~/.config/rmk/config.toml`

use crate::controller::{PolicyKind, DEFAULT_TASK};
use crate::job::DEFAULT_CONCURRENCY;
use crate::plan::BUILD_FILE;
use crate::policy::DEFAULT_RESPONSE_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build defaults
    pub build: BuildConfig,

    /// Remote result cache
    pub cache: CacheConfig,

    /// Checkouts of remote build descriptions
    pub git: GitConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Print command lines with absolute paths
    pub verbose: bool,

    /// Echo each command line before running it
    pub trace: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            trace: true,
        }
    }
}

/// Build defaults, overridable on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Task built when none is given
    pub task: String,

    /// Build file looked up in directories
    pub build_file: String,

    /// Maximum number of jobs running at once
    pub concurrency: usize,

    /// Rebuild policy
    pub policy: PolicyKind,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            task: DEFAULT_TASK.to_string(),
            build_file: BUILD_FILE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            policy: PolicyKind::default(),
        }
    }
}

/// Remote result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base URL of the remote cache
    pub remote_url: Option<String>,

    /// Seconds to wait for the cache server to answer a request
    pub timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            timeout_secs: DEFAULT_RESPONSE_TIMEOUT.as_secs(),
        }
    }
}

/// Git checkout settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Directory receiving working copies (default: ~/.rmk)
    pub checkout_dir: Option<PathBuf>,
}

//! Error types for rmk
//!
//! All modules use `RmkResult<T>` as their return type. Job outcomes carry a
//! [`BuildFailure`], which is cloneable and serialisable so that it can be
//! shared with every waiter and persisted next to successful results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rmk operations
pub type RmkResult<T> = Result<T, RmkError>;

/// A failed job, as seen by every dependent and by later runs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct BuildFailure {
    /// Directory of the plan that owns the failing job
    pub dir: PathBuf,
    /// Name of the job the failure originated in
    pub job: String,
    /// Human readable description, usually including captured stderr
    pub message: String,
}

impl BuildFailure {
    pub fn new(dir: impl Into<PathBuf>, job: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job: job.into(),
            message: message.into(),
        }
    }

    /// Turn any error raised while building `job` into a failure.
    ///
    /// A failure that already originated in a dependency keeps its own
    /// directory and job so the report points at the root cause.
    pub fn from_error(err: RmkError, dir: impl Into<PathBuf>, job: impl Into<String>) -> Self {
        match err {
            RmkError::Build(failure) => failure,
            other => {
                let job = job.into();
                Self::new(dir, job.clone(), format!("{}: {}", job, other))
            }
        }
    }
}

/// All errors that can occur in rmk
#[derive(Error, Debug)]
pub enum RmkError {
    // Build errors
    #[error(transparent)]
    Build(#[from] BuildFailure),

    #[error("Rebuilding {job}({job_mtime}) because {dependency}({dependency_mtime}) is newer")]
    StaleDependency {
        job: String,
        job_mtime: String,
        dependency: String,
        dependency_mtime: String,
    },

    #[error("Rebuilding {job} because {file} doesn't exist")]
    MissingResult { job: String, file: PathBuf },

    #[error("Unknown task '{task}' in {plan}")]
    UnknownTask { task: String, plan: PathBuf },

    // Cache errors
    #[error("Corrupt cache file {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("Remote cache unavailable: {0}")]
    RemoteCache(String),

    #[error("Remote cache entry not found: {0}")]
    RemoteMiss(String),

    // Plan errors
    #[error("Build file not found: {0}")]
    PlanNotFound(PathBuf),

    #[error("Invalid build file {path}: {reason}")]
    PlanInvalid { path: PathBuf, reason: String },

    #[error("Build file import cycle through {0}")]
    PlanCycle(PathBuf),

    #[error("Unknown plan alias '{alias}' in {plan}")]
    UnknownImport { alias: String, plan: PathBuf },

    #[error("Git checkout of {remote} failed: {reason}")]
    Git { remote: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command}\n{stderr}")]
    Process { command: String, stderr: String },

    #[error("{command}\nKilled")]
    Killed { command: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl RmkError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Process {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error is a job failure with a known origin directory
    pub fn build_failure(&self) -> Option<&BuildFailure> {
        match self {
            Self::Build(failure) => Some(failure),
            _ => None,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PlanNotFound(_) => Some("Create a build.toml or pass -C <dir>"),
            Self::StaleDependency { .. } | Self::MissingResult { .. } => {
                Some("Run without --policy readonly to rebuild")
            }
            Self::UnknownTask { .. } => Some("Add the task under [tasks] in build.toml"),
            _ => None,
        }
    }
}

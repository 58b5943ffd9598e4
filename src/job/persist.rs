//! On-disk job results
//!
//! Layout: `<build dir>/cache/<job name>/<cache key>` holds the bincode
//! encoded outcome, the same path with a `.dep` suffix holds the implicit
//! dependency set. Unreadable entries are deleted and reported as absent.

use super::Outcome;
use crate::error::{RmkError, RmkResult};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::warn;

/// Suffix of the implicit dependency sidecar
pub const DEP_SUFFIX: &str = ".dep";

/// A previously persisted result
#[derive(Debug, Clone)]
pub struct Persisted {
    pub outcome: Outcome,
    /// `None` when no sidecar was written
    pub implicit: Option<BTreeSet<String>>,
}

/// Location of one job's persisted result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dep_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(DEP_SUFFIX);
        PathBuf::from(name)
    }

    /// Modification time of the result file
    pub async fn mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).await.ok()?.modified().ok()
    }

    /// Read the persisted result, discarding corrupt files
    pub async fn load(&self) -> Option<Persisted> {
        let outcome: Outcome = read_or_discard(&self.path).await?;
        let implicit = read_or_discard(&self.dep_path()).await;
        Some(Persisted { outcome, implicit })
    }

    /// Write `outcome` and, when non-empty, its implicit dependencies
    pub async fn store(&self, outcome: &Outcome, implicit: &BTreeSet<String>) -> RmkResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RmkError::io(format!("creating {}", parent.display()), e))?;
        }

        let bytes = bincode::serialize(outcome)?;
        fs::write(&self.path, bytes)
            .await
            .map_err(|e| RmkError::io(format!("writing {}", self.path.display()), e))?;

        let dep_path = self.dep_path();
        if implicit.is_empty() {
            match fs::remove_file(&dep_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RmkError::io(format!("removing {}", dep_path.display()), e));
                }
            }
        } else {
            let bytes = bincode::serialize(implicit)?;
            fs::write(&dep_path, bytes)
                .await
                .map_err(|e| RmkError::io(format!("writing {}", dep_path.display()), e))?;
        }
        Ok(())
    }
}

async fn read_or_discard<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            discard(path, &e.to_string()).await;
            return None;
        }
    };
    match bincode::deserialize(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            discard(path, &e.to_string()).await;
            None
        }
    }
}

async fn discard(path: &Path, reason: &str) {
    let err = RmkError::CacheCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    warn!("{}, removing it", err);
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

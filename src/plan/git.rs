//! Local working copies of remote build descriptions

use crate::error::{RmkError, RmkResult};
use crate::process::{Command, ProcessRunner};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::fs;
use tracing::debug;

/// Branch used when a reference names none
pub const DEFAULT_REF: &str = "master";

/// A repository to materialise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRemote {
    /// Clone URL, without the `#ref` fragment
    pub url: String,
    /// Name of the local working copy
    pub name: String,
    /// Branch or tag to check out
    pub reference: String,
}

/// Where a plan reference is resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Git(GitRemote),
}

fn ssh_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(git@[^:]+:(?:[^#]*/)?([^/#]+?)(?:\.git)?/?)(?:#(.*))?$").expect("valid regex")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(https?://[^#]*/([^/#]+?)(?:\.git)?/?)(?:#(.*))?$").expect("valid regex")
    })
}

impl Location {
    /// Classify `base`: `git@host:owner/repo.git#ref` and
    /// `https://host/owner/repo.git#ref` are remote, anything else is a
    /// local directory.
    pub fn parse(base: &str) -> Self {
        let captures = ssh_pattern()
            .captures(base)
            .or_else(|| url_pattern().captures(base));
        match captures {
            Some(caps) => {
                let reference = caps
                    .get(3)
                    .map(|m| m.as_str())
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_REF);
                Self::Git(GitRemote {
                    url: caps[1].to_string(),
                    name: caps[2].to_string(),
                    reference: reference.to_string(),
                })
            }
            None => Self::Local(PathBuf::from(base)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckoutInfo {
    branch: String,
}

/// Keeps working copies of remote repositories below one directory.
///
/// `<root>/<name>` holds the working copy, `<root>/<name>.json` records
/// the checked out branch. Each working copy is updated at most once per
/// run.
#[derive(Clone)]
pub struct GitCheckouts {
    root: PathBuf,
    runner: ProcessRunner,
    updated: Arc<Mutex<HashSet<String>>>,
}

impl GitCheckouts {
    pub fn new(root: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            root: root.into(),
            runner,
            updated: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Clone, switch or pull `remote` and return its local directory
    pub async fn materialize(&self, remote: &GitRemote) -> RmkResult<PathBuf> {
        let local = self.root.join(&remote.name);
        let key = format!("{}#{}", remote.url, remote.reference);
        if self
            .updated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
        {
            return Ok(local);
        }

        let failed = |e: RmkError| RmkError::Git {
            remote: remote.url.clone(),
            reason: e.to_string(),
        };
        let info_path = self.root.join(format!("{}.json", remote.name));

        if fs::metadata(&local).await.map(|m| m.is_dir()).unwrap_or(false) {
            let current = read_info(&info_path).await;
            if current.as_ref().map(|info| info.branch.as_str()) == Some(remote.reference.as_str()) {
                debug!("Updating {}", local.display());
                self.git(&["pull"], &local).await.map_err(failed)?;
            } else {
                debug!("Switching {} to {}", local.display(), remote.reference);
                self.git(&["checkout", &remote.reference], &local)
                    .await
                    .map_err(failed)?;
            }
        } else {
            fs::create_dir_all(&self.root)
                .await
                .map_err(|e| RmkError::io(format!("creating {}", self.root.display()), e))?;
            let target = local.display().to_string();
            self.git(
                &["clone", "--branch", &remote.reference, &remote.url, &target],
                &self.root,
            )
            .await
            .map_err(failed)?;
        }

        let info = CheckoutInfo {
            branch: remote.reference.clone(),
        };
        fs::write(&info_path, serde_json::to_vec_pretty(&info)?)
            .await
            .map_err(|e| RmkError::io(format!("writing {}", info_path.display()), e))?;

        self.updated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
        Ok(local)
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> RmkResult<String> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        self.runner.system(Command::Argv(argv), Some(cwd)).await
    }
}

async fn read_info(path: &Path) -> Option<CheckoutInfo> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

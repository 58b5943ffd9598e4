//! Top level build driver

use crate::error::{RmkError, RmkResult};
use crate::job::{self, Dep, Scheduler};
use crate::plan::PlanRegistry;
use crate::policy::{
    AlwaysPolicy, BuildPolicy, LocalPolicy, ModificationTimePolicy, RemoteCache, RemoteCachePolicy,
};
use clap::ValueEnum;
use console::style;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Task built when none is named
pub const DEFAULT_TASK: &str = "all";

/// Selectable build policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Rebuild everything
    Always,
    /// Rebuild what is older than its inputs
    #[default]
    Mtime,
    /// Rebuild the requested jobs, reuse their dependencies when current
    Local,
    /// Fail if anything would need rebuilding
    Readonly,
    /// Like mtime, but fetch and publish results through a remote cache
    Remote,
}

impl PolicyKind {
    /// Construct the policy. `remote` is required for [`PolicyKind::Remote`].
    pub fn instantiate(
        self,
        scheduler: Scheduler,
        remote: Option<RemoteCache>,
    ) -> RmkResult<Arc<dyn BuildPolicy>> {
        Ok(match self {
            Self::Always => Arc::new(AlwaysPolicy::new(scheduler)),
            Self::Mtime => Arc::new(ModificationTimePolicy::new(scheduler)),
            Self::Local => Arc::new(LocalPolicy::new(scheduler)),
            Self::Readonly => Arc::new(ModificationTimePolicy::readonly(scheduler)),
            Self::Remote => {
                let remote = remote.ok_or_else(|| {
                    RmkError::User(
                        "The remote policy needs --remote <URL> or [cache] remote_url".to_string(),
                    )
                })?;
                Arc::new(RemoteCachePolicy::new(scheduler, remote))
            }
        })
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Always => "always",
            Self::Mtime => "mtime",
            Self::Local => "local",
            Self::Readonly => "readonly",
            Self::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Ok,
    /// A job failed; carries the directory of the plan it belongs to
    Failed(Option<PathBuf>),
}

impl BuildStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub status: BuildStatus,
    /// Jobs that ran (or were imported) during the run
    pub modified: usize,
    /// Message of the error that failed the run
    pub error: Option<String>,
}

/// Loads the plan in a directory and builds one of its tasks
pub struct Controller {
    dir: PathBuf,
    task: String,
    registry: PlanRegistry,
    policy: Arc<dyn BuildPolicy>,
}

impl Controller {
    pub fn new(dir: impl Into<PathBuf>, registry: PlanRegistry, policy: Arc<dyn BuildPolicy>) -> Self {
        Self {
            dir: dir.into(),
            task: DEFAULT_TASK.to_string(),
            registry,
            policy,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn registry(&self) -> &PlanRegistry {
        &self.registry
    }

    /// The jobs of the configured task in the directory's plan
    pub async fn load_jobs(&self) -> RmkResult<Vec<Dep>> {
        let plan = self
            .registry
            .load(".", &self.dir.display().to_string())
            .await?;
        plan.task(&self.task)
    }

    /// Build `jobs` (default: the configured task) with `policy` (default:
    /// the configured policy) and report the outcome on the console.
    pub async fn run(&self, policy: Option<&dyn BuildPolicy>, jobs: Option<Vec<Dep>>) -> BuildReport {
        let policy = policy.unwrap_or(self.policy.as_ref());
        let jobs = match jobs {
            Some(jobs) => jobs,
            None => match self.load_jobs().await {
                Ok(jobs) => jobs,
                Err(e) => return self.failed(e, 0),
            },
        };
        for job in jobs.iter().filter_map(Dep::as_job) {
            job.reset();
        }

        let result = policy.build(&jobs).await;
        let modified = job::walk(&jobs).iter().filter(|j| j.is_modified()).count();
        match result {
            Ok(values) => {
                debug!("Results: {:?}", values);
                println!("{}", style("Build OK").green().bold());
                BuildReport {
                    status: BuildStatus::Ok,
                    modified,
                    error: None,
                }
            }
            Err(e) => self.failed(e, modified),
        }
    }

    fn failed(&self, err: RmkError, modified: usize) -> BuildReport {
        eprintln!("{}", err);
        if let Some(hint) = err.hint() {
            eprintln!("{} {}", style("Hint:").yellow(), hint);
        }
        let dir = err.build_failure().map(|f| f.dir.clone());
        match &dir {
            Some(dir) => println!(
                "{} {}",
                style("Build Failed in").red().bold(),
                dir.display()
            ),
            None => println!("{}", style("Build Failed").red().bold()),
        }
        BuildReport {
            status: BuildStatus::Failed(dir),
            modified,
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::quiet_scheduler;
    use crate::plan::GitCheckouts;
    use crate::process::{Discard, ProcessRunner, ProcessTable};
    use tempfile::TempDir;

    fn controller(dir: &Path, kind: PolicyKind) -> Controller {
        let runner = ProcessRunner::new(ProcessTable::new())
            .with_trace(false)
            .with_console(Arc::new(Discard), Arc::new(Discard));
        let registry = PlanRegistry::new(GitCheckouts::new(dir.join("checkouts"), runner));
        let policy = kind.instantiate(quiet_scheduler(4), None).unwrap();
        Controller::new(dir, registry, policy)
    }

    #[tokio::test]
    async fn second_run_modifies_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("in.txt"), "x\n").unwrap();
        std::fs::write(
            dir.path().join("build.toml"),
            "[jobs.copy]\ninputs = [\"in.txt\"]\ncommand = \"cp {inputs} {out}\"\noutput = \"out.txt\"\n\n[tasks]\nall = [\"copy\"]\n",
        )
        .unwrap();

        let first = controller(dir.path(), PolicyKind::Mtime).run(None, None).await;
        assert_eq!(first.status, BuildStatus::Ok);
        assert_eq!(first.modified, 1);

        let second = controller(dir.path(), PolicyKind::Mtime).run(None, None).await;
        assert_eq!(second.status, BuildStatus::Ok);
        assert_eq!(second.modified, 0);
    }

    #[tokio::test]
    async fn failure_names_the_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("build.toml"),
            "[jobs.broken]\ncommand = \"exit 3\"\n",
        )
        .unwrap();

        let report = controller(dir.path(), PolicyKind::Always)
            .with_task("broken")
            .run(None, None)
            .await;
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(report.status, BuildStatus::Failed(Some(expected)));
        assert!(report.error.unwrap().starts_with("broken: "));
    }

    #[tokio::test]
    async fn missing_plan_fails_without_directory() {
        let dir = TempDir::new().unwrap();
        let report = controller(dir.path(), PolicyKind::Mtime).run(None, None).await;
        assert_eq!(report.status, BuildStatus::Failed(None));
    }

    #[test]
    fn remote_policy_needs_a_url() {
        assert!(PolicyKind::Remote.instantiate(quiet_scheduler(1), None).is_err());
        assert!(PolicyKind::Remote
            .instantiate(quiet_scheduler(1), Some(RemoteCache::new("http://cache.local")))
            .is_ok());
    }
}

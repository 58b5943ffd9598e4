//! Timestamp based rebuild decisions

use super::{jobs, resolve, BuildPolicy, RemoteCache};
use crate::error::{RmkError, RmkResult};
use crate::job::{Dep, Job, Scheduler, Value};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Why a job's persisted result can or cannot be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// No usable persisted result
    Missing { file: PathBuf },
    /// Something the job depends on changed after its result was written
    Newer {
        dependency: String,
        job_mtime: SystemTime,
        dependency_mtime: SystemTime,
    },
}

impl Staleness {
    /// The diagnostic for a stale result; `None` when fresh
    pub fn to_error(&self, job: &Job) -> Option<RmkError> {
        match self {
            Self::Fresh => None,
            Self::Missing { file } => Some(RmkError::MissingResult {
                job: job.name().to_string(),
                file: file.clone(),
            }),
            Self::Newer {
                dependency,
                job_mtime,
                dependency_mtime,
            } => Some(RmkError::StaleDependency {
                job: job.name().to_string(),
                job_mtime: format_time(*job_mtime),
                dependency: dependency.clone(),
                dependency_mtime: format_time(*dependency_mtime),
            }),
        }
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

async fn file_mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Compare the persisted result of `job` against everything it depends on.
///
/// Checked in order: leaf sources, implicit dependencies, then the
/// persisted results of direct dependency jobs. Entries that cannot be
/// stat'ed are not file dependencies and are skipped.
pub async fn check_staleness(job: &Job) -> Staleness {
    let missing = || Staleness::Missing {
        file: job.cache_file().path().to_path_buf(),
    };
    if !job.load_persisted().await {
        return missing();
    }
    let Some(job_mtime) = job.mtime().await else {
        return missing();
    };

    let files = job
        .sources()
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .chain(job.implicit_dependencies());
    for file in files {
        let path = job.dir().join(&file);
        if let Some(dependency_mtime) = file_mtime(&path).await {
            if dependency_mtime > job_mtime {
                return Staleness::Newer {
                    dependency: path.display().to_string(),
                    job_mtime,
                    dependency_mtime,
                };
            }
        }
    }

    for dep in jobs(job.depends()) {
        if let Some(dependency_mtime) = dep.mtime().await {
            if dependency_mtime > job_mtime {
                return Staleness::Newer {
                    dependency: dep.name().to_string(),
                    job_mtime,
                    dependency_mtime,
                };
            }
        }
    }
    Staleness::Fresh
}

/// Rebuilds a job only when its persisted result is missing or older than
/// one of its dependencies. In readonly mode a needed rebuild is an error.
#[derive(Clone)]
pub struct ModificationTimePolicy {
    scheduler: Scheduler,
    readonly: bool,
    remote: Option<RemoteCache>,
}

impl ModificationTimePolicy {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            readonly: false,
            remote: None,
        }
    }

    /// Assert that nothing needs rebuilding
    pub fn readonly(scheduler: Scheduler) -> Self {
        Self {
            readonly: true,
            ..Self::new(scheduler)
        }
    }

    /// Try `remote` before running a stale job locally
    pub fn with_remote(mut self, remote: RemoteCache) -> Self {
        self.remote = Some(remote);
        self
    }

    async fn rebuild(&self, job: &Job) -> RmkResult<()> {
        match &self.remote {
            Some(remote) => remote.fetch_or_build(job, self).await,
            None => job.build(self).await,
        }
    }
}

#[async_trait]
impl BuildPolicy for ModificationTimePolicy {
    async fn build(&self, deps: &[Dep]) -> RmkResult<Vec<Value>> {
        for job in jobs(deps) {
            if job.is_scheduled() {
                continue;
            }
            let staleness = check_staleness(job).await;
            match staleness.to_error(job) {
                None => {
                    job.use_persisted();
                }
                Some(reason) => {
                    if self.readonly {
                        return Err(reason);
                    }
                    debug!("{}", reason);
                    self.rebuild(job).await?;
                }
            }
        }
        resolve(deps).await
    }

    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::{counting, quiet_scheduler, scope_in};
    use crate::job::{work, WorkContext};
    use filetime::FileTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_future(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(10);
        filetime::set_file_mtime(path, FileTime::from_system_time(later)).unwrap();
    }

    /// A compile-like job that records `header` as an implicit dependency
    fn compile(dir: &Path, header: &Path, counter: &Arc<AtomicUsize>) -> Job {
        let header = header.display().to_string();
        let counter = counter.clone();
        Job::new(
            "compile",
            scope_in(dir, "v1"),
            vec![dir.join("a.c").into()],
            vec![],
            work(move |ctx: WorkContext| {
                let header = header.clone();
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctx.implicit.insert(header);
                    Ok(Value::from("a.o"))
                }
            }),
        )
        .unwrap()
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.c"), "int main() {}\n").unwrap();
        std::fs::write(dir.path().join("a.h"), "#define A 1\n").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn second_run_does_no_work() {
        let dir = project();
        let counter = Arc::new(AtomicUsize::new(0));
        let header = dir.path().join("a.h");

        let policy = ModificationTimePolicy::new(quiet_scheduler(4));
        let first = compile(dir.path(), &header, &counter);
        policy.build(&[first.into()]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let second = compile(dir.path(), &header, &counter);
        let values = policy.build(&[second.clone().into()]).await.unwrap();
        assert_eq!(values, vec![Value::from("a.o")]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!second.is_modified());
    }

    #[tokio::test]
    async fn newer_implicit_dependency_triggers_rebuild() {
        let dir = project();
        let counter = Arc::new(AtomicUsize::new(0));
        let header = dir.path().join("a.h");
        let policy = ModificationTimePolicy::new(quiet_scheduler(4));

        policy
            .build(&[compile(dir.path(), &header, &counter).into()])
            .await
            .unwrap();
        touch_future(&header);

        let again = compile(dir.path(), &header, &counter);
        assert!(matches!(check_staleness(&again).await, Staleness::Newer { .. }));
        policy.build(&[again.into()]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unrelated_file_changes_are_ignored() {
        let dir = project();
        let counter = Arc::new(AtomicUsize::new(0));
        let header = dir.path().join("a.h");
        let policy = ModificationTimePolicy::new(quiet_scheduler(4));

        policy
            .build(&[compile(dir.path(), &header, &counter).into()])
            .await
            .unwrap();
        touch_future(&dir.path().join("unrelated.txt"));

        policy
            .build(&[compile(dir.path(), &header, &counter).into()])
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_dependencies_are_not_staleness() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = scope_in(dir.path(), "v1");
        let policy = ModificationTimePolicy::new(quiet_scheduler(1));

        let job = counting(&scope, "gen", vec!["does/not/exist.c".into()], &counter);
        policy.build(&[job.into()]).await.unwrap();
        let job = counting(&scope, "gen", vec!["does/not/exist.c".into()], &counter);
        assert_eq!(check_staleness(&job).await, Staleness::Fresh);
    }

    #[tokio::test]
    async fn readonly_names_job_and_dependency() {
        let dir = project();
        let counter = Arc::new(AtomicUsize::new(0));
        let header = dir.path().join("a.h");

        ModificationTimePolicy::new(quiet_scheduler(4))
            .build(&[compile(dir.path(), &header, &counter).into()])
            .await
            .unwrap();
        touch_future(&dir.path().join("a.c"));

        let readonly = ModificationTimePolicy::readonly(quiet_scheduler(4));
        let err = readonly
            .build(&[compile(dir.path(), &header, &counter).into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RmkError::StaleDependency { .. }));
        let message = err.to_string();
        assert!(message.starts_with("Rebuilding compile("));
        assert!(message.contains("a.c("));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn readonly_requires_a_result() {
        let dir = project();
        let counter = Arc::new(AtomicUsize::new(0));
        let readonly = ModificationTimePolicy::readonly(quiet_scheduler(1));
        let err = readonly
            .build(&[compile(dir.path(), &dir.path().join("a.h"), &counter).into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RmkError::MissingResult { .. }));
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[tokio::test]
    async fn fresh_failure_is_reraised_without_running() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let failing = |counter: &Arc<AtomicUsize>| {
            let counter = counter.clone();
            Job::new(
                "fails",
                scope_in(dir.path(), "v1"),
                vec![],
                vec![],
                work(move |_ctx| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(RmkError::User("nope".into()))
                    }
                }),
            )
            .unwrap()
        };
        let policy = ModificationTimePolicy::new(quiet_scheduler(1));

        assert!(policy.build(&[failing(&counter).into()]).await.is_err());
        let err = policy.build(&[failing(&counter).into()]).await.unwrap_err();
        assert_eq!(err.build_failure().unwrap().message, "fails: nope");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rebuilt_dependency_invalidates_dependent() {
        let dir = TempDir::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = scope_in(dir.path(), "v1");
        let policy = ModificationTimePolicy::new(quiet_scheduler(2));

        let leaf = counting(&scope, "leaf", vec![], &counter);
        let top = counting(&scope, "top", vec![leaf.clone().into()], &counter);
        policy.build(&[top.clone().into()]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        touch_future(leaf.cache_file().path());
        let leaf = counting(&scope, "leaf", vec![], &counter);
        let top = counting(&scope, "top", vec![leaf.into()], &counter);
        match check_staleness(&top).await {
            Staleness::Newer { dependency, .. } => assert_eq!(dependency, "leaf"),
            other => panic!("expected stale, got {:?}", other),
        }
    }
}

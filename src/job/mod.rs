//! Jobs: nodes of the build graph
//!
//! A [`Job`] names a unit of work, the dependencies it consumes and where
//! its result is persisted. Each job runs its work at most once per run:
//! the first `build` stores a shared pending result that every later
//! caller awaits.

mod persist;
mod scheduler;
mod value;

pub use persist::{CacheFile, Persisted, DEP_SUFFIX};
pub use scheduler::{Scheduler, DEFAULT_CONCURRENCY};
pub use value::{Dep, Value};

use crate::error::{BuildFailure, RmkError, RmkResult};
use crate::fingerprint::Fingerprint;
use crate::plan::PlanScope;
use crate::policy::BuildPolicy;
use crate::process::ProcessRunner;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, warn};

/// What a job produced: its value, or the failure every dependent sees
pub type Outcome = Result<Value, BuildFailure>;

/// Boxed future returned by a job's work
pub type WorkFuture = BoxFuture<'static, RmkResult<Value>>;

/// The work of a job
pub type WorkFn = Arc<dyn Fn(WorkContext) -> WorkFuture + Send + Sync>;

/// Wrap an async closure as job work
pub fn work<F, Fut>(f: F) -> WorkFn
where
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RmkResult<Value>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Implicit dependencies discovered while a job runs, e.g. headers
/// reported by a compiler.
#[derive(Debug, Clone, Default)]
pub struct ImplicitDeps {
    inner: Arc<Mutex<BTreeSet<String>>>,
}

impl ImplicitDeps {
    fn seeded(initial: BTreeSet<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, path: impl Into<String>) {
        self.lock().insert(path.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&self, paths: I) {
        self.lock().extend(paths);
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.lock().clone()
    }
}

/// Everything a job's work gets to see
#[derive(Clone)]
pub struct WorkContext {
    /// Job name
    pub job: String,
    /// Resolved values of the explicit dependencies, in declaration order
    pub args: Vec<Value>,
    /// Accumulator for dependencies discovered at run time
    pub implicit: ImplicitDeps,
    /// Runner for external commands
    pub runner: ProcessRunner,
    /// Directory of the owning plan
    pub dir: PathBuf,
    /// Build output directory of the owning plan
    pub build_dir: PathBuf,
}

type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

#[derive(Default)]
enum Slot {
    #[default]
    Empty,
    Pending(SharedOutcome),
    Done(Outcome),
}

#[derive(Default)]
struct JobState {
    slot: Slot,
    persisted: Option<Persisted>,
    implicit: Option<BTreeSet<String>>,
    modified: bool,
}

struct JobInner {
    name: String,
    scope: Arc<PlanScope>,
    depends: Vec<Dep>,
    includes: Vec<Dep>,
    work: WorkFn,
    cache_key: String,
    cache: CacheFile,
    sources: Vec<Value>,
    state: Mutex<JobState>,
}

/// Cheap, cloneable handle to a node of the build graph
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Create a job. Names must be usable as a single path component.
    pub fn new(
        name: impl Into<String>,
        scope: Arc<PlanScope>,
        depends: Vec<Dep>,
        includes: Vec<Dep>,
        work: WorkFn,
    ) -> RmkResult<Self> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(RmkError::User(format!("Invalid job name '{}'", name)));
        }

        let mut key = Fingerprint::new();
        key.update(scope.version()).update(&name);
        for dep in &depends {
            match dep {
                Dep::Job(job) => key.update("job").update(job.cache_key()),
                Dep::Value(value) => key.update("value").update(&value.identity()),
            };
        }
        let cache_key = key.finish();
        let cache = CacheFile::new(scope.build_dir().join("cache").join(&name).join(&cache_key));
        let sources = collect_sources(&depends);

        Ok(Self {
            inner: Arc::new(JobInner {
                name,
                scope,
                depends,
                includes,
                work,
                cache_key,
                cache,
                sources,
                state: Mutex::new(JobState::default()),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scope(&self) -> &PlanScope {
        &self.inner.scope
    }

    /// Directory of the owning plan
    pub fn dir(&self) -> &Path {
        self.inner.scope.dir()
    }

    pub fn depends(&self) -> &[Dep] {
        &self.inner.depends
    }

    pub fn includes(&self) -> &[Dep] {
        &self.inner.includes
    }

    pub fn cache_key(&self) -> &str {
        &self.inner.cache_key
    }

    pub fn cache_file(&self) -> &CacheFile {
        &self.inner.cache
    }

    /// Leaf values of the explicit dependency closure, first occurrence wins
    pub fn sources(&self) -> &[Value] {
        &self.inner.sources
    }

    /// Whether the two handles refer to the same job
    pub fn same(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Whether this job already has a result, pending or final, this run
    pub fn is_scheduled(&self) -> bool {
        !matches!(self.state().slot, Slot::Empty)
    }

    /// Whether this job's work was started (or its result imported) this run
    pub fn is_modified(&self) -> bool {
        self.state().modified
    }

    /// The final outcome, if the job has completed
    pub fn outcome(&self) -> Option<Outcome> {
        match &self.state().slot {
            Slot::Done(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Modification time of the persisted result
    pub async fn mtime(&self) -> Option<SystemTime> {
        self.inner.cache.mtime().await
    }

    /// Load the persisted result from an earlier run. Returns whether one
    /// exists; corrupt files are removed and count as absent.
    pub async fn load_persisted(&self) -> bool {
        if self.state().persisted.is_some() {
            return true;
        }
        let Some(persisted) = self.inner.cache.load().await else {
            return false;
        };
        let mut state = self.state();
        if state.implicit.is_none() {
            state.implicit = persisted.implicit.clone();
        }
        state.persisted = Some(persisted);
        true
    }

    /// Adopt the persisted result as this run's result
    pub fn use_persisted(&self) -> bool {
        let mut state = self.state();
        match state.persisted.as_ref().map(|p| p.outcome.clone()) {
            Some(outcome) => {
                state.slot = Slot::Done(outcome);
                true
            }
            None => false,
        }
    }

    /// The implicit dependencies recorded for this job, or inherited from
    /// its dependency jobs if it has none of its own yet.
    pub fn implicit_dependencies(&self) -> BTreeSet<String> {
        if let Some(implicit) = &self.state().implicit {
            return implicit.clone();
        }
        self.inherited_implicit()
    }

    fn inherited_implicit(&self) -> BTreeSet<String> {
        self.inner
            .depends
            .iter()
            .filter_map(Dep::as_job)
            .flat_map(|job| job.implicit_dependencies())
            .collect()
    }

    /// Take a result obtained elsewhere (a remote cache) as this run's
    /// result, and persist it. A failed write only costs the local copy.
    pub async fn import(&self, value: Value, implicit: BTreeSet<String>) {
        let outcome: Outcome = Ok(value);
        {
            let mut state = self.state();
            state.slot = Slot::Done(outcome.clone());
            state.modified = true;
        }
        self.persist(&outcome, implicit).await;
    }

    /// Resolve dependencies through `policy`, then start this job's work.
    ///
    /// A dependency failure becomes this job's persisted result without
    /// running the work. With a sequential scheduler the work's outcome is
    /// awaited before returning.
    pub async fn build(&self, policy: &dyn BuildPolicy) -> RmkResult<()> {
        let mut all = self.inner.depends.clone();
        all.extend(self.inner.includes.iter().cloned());

        let mut resolved = match policy.build(&all).await {
            Ok(values) => values,
            Err(err) => {
                let failure = BuildFailure::from_error(err, self.dir(), self.name());
                self.complete_now(Err(failure.clone())).await;
                return Err(RmkError::Build(failure));
            }
        };
        resolved.truncate(self.inner.depends.len());

        let scheduler = policy.scheduler().clone();
        let implicit = ImplicitDeps::seeded(self.inherited_implicit());
        let ctx = WorkContext {
            job: self.name().to_string(),
            args: resolved,
            implicit: implicit.clone(),
            runner: scheduler.runner().clone(),
            dir: self.dir().to_path_buf(),
            build_dir: self.inner.scope.build_dir().to_path_buf(),
        };

        let job = self.clone();
        let permits = scheduler.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire().await;
            debug!("Running {}", job.name());
            let outcome = (job.inner.work)(ctx)
                .await
                .map_err(|e| BuildFailure::from_error(e, job.dir(), job.name()));
            job.persist(&outcome, implicit.snapshot()).await;
            outcome
        });

        let dir = self.dir().to_path_buf();
        let name = self.name().to_string();
        let pending = async move {
            handle.await.unwrap_or_else(|e| {
                Err(BuildFailure::new(&dir, &name, format!("{}: work aborted: {}", name, e)))
            })
        }
        .boxed()
        .shared();

        {
            let mut state = self.state();
            state.slot = Slot::Pending(pending);
            state.modified = true;
        }

        if scheduler.is_sequential() {
            self.result().await?;
        }
        Ok(())
    }

    async fn complete_now(&self, outcome: Outcome) {
        {
            let mut state = self.state();
            state.slot = Slot::Done(outcome.clone());
            state.modified = true;
        }
        let implicit = self.inherited_implicit();
        self.persist(&outcome, implicit).await;
    }

    async fn persist(&self, outcome: &Outcome, implicit: BTreeSet<String>) {
        if let Err(e) = self.inner.cache.store(outcome, &implicit).await {
            warn!("Failed to persist result of {}: {}", self.name(), e);
        }
        self.state().implicit = Some(implicit);
    }

    /// Wait for this job's value. A failure is re-raised to every caller.
    pub async fn result(&self) -> RmkResult<Value> {
        let pending = {
            let state = self.state();
            match &state.slot {
                Slot::Done(outcome) => return outcome.clone().map_err(RmkError::Build),
                Slot::Pending(pending) => pending.clone(),
                Slot::Empty => {
                    return Err(RmkError::Internal(format!("{} was never built", self.name())));
                }
            }
        };

        let outcome = pending.await;
        {
            let mut state = self.state();
            if matches!(state.slot, Slot::Pending(_)) {
                state.slot = Slot::Done(outcome.clone());
            }
        }
        outcome.map_err(RmkError::Build)
    }

    /// Forget everything learned this run, for this job and its dependency
    /// jobs, so the next build re-evaluates the whole graph.
    pub fn reset(&self) {
        let mut seen = HashSet::new();
        self.reset_inner(&mut seen);
    }

    fn reset_inner(&self, seen: &mut HashSet<usize>) {
        if !seen.insert(self.addr()) {
            return;
        }
        *self.state() = JobState::default();
        for dep in self.inner.depends.iter().chain(&self.inner.includes) {
            if let Dep::Job(job) = dep {
                job.reset_inner(seen);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.inner.name)
            .field("dir", &self.inner.scope.dir())
            .field("cache_key", &self.inner.cache_key)
            .field("depends", &self.inner.depends.len())
            .finish()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

fn collect_sources(depends: &[Dep]) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for dep in depends {
        match dep {
            Dep::Job(job) => {
                for source in job.sources() {
                    if seen.insert(source.identity()) {
                        sources.push(source.clone());
                    }
                }
            }
            Dep::Value(value) => {
                for leaf in value.flatten() {
                    if seen.insert(leaf.identity()) {
                        sources.push(leaf.clone());
                    }
                }
            }
        }
    }
    sources
}

/// Every distinct job reachable from `deps`, dependencies first
pub fn walk(deps: &[Dep]) -> Vec<Job> {
    fn visit(job: &Job, seen: &mut HashSet<usize>, out: &mut Vec<Job>) {
        if !seen.insert(job.addr()) {
            return;
        }
        for dep in job.depends().iter().chain(job.includes()) {
            if let Dep::Job(child) = dep {
                visit(child, seen, out);
            }
        }
        out.push(job.clone());
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for job in deps.iter().filter_map(Dep::as_job) {
        visit(job, &mut seen, &mut out);
    }
    out
}

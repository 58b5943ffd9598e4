//! Plans: loaded build descriptions
//!
//! A [`Plan`] owns the jobs declared by one build file. Jobs are created
//! lazily by task factories; a task is evaluated at most once, so asking
//! for the same task twice yields the same job handles.

mod buildfile;
mod git;
mod registry;

pub use buildfile::{parse_depfile, BuildFile, JobSpec, PlanImport};
pub use git::{GitCheckouts, GitRemote, Location, DEFAULT_REF};
pub use registry::{PlanRegistry, BUILD_FILE};

use crate::error::{RmkError, RmkResult};
use crate::fingerprint::digest;
use crate::job::{work, Dep, Job, Value, WorkContext};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Directory, relative to the plan, that receives build products
pub const BUILD_DIR: &str = ".rmk";

/// Identity of a plan as seen by its jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanScope {
    file: PathBuf,
    dir: PathBuf,
    build_dir: PathBuf,
    version: String,
}

impl PlanScope {
    pub fn new(file: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        let file = file.into();
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let build_dir = dir.join(BUILD_DIR);
        Self {
            file,
            dir,
            build_dir,
            version: version.into(),
        }
    }

    /// The build file
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Digest of the build file contents
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Produces the dependency list of a task
pub type TaskFactory = Arc<dyn Fn(&Plan) -> RmkResult<Vec<Dep>> + Send + Sync>;

pub struct Plan {
    scope: Arc<PlanScope>,
    imports: HashMap<String, Arc<Plan>>,
    factories: Mutex<BTreeMap<String, TaskFactory>>,
    evaluated: Mutex<HashMap<String, Vec<Dep>>>,
    resolving: Mutex<HashSet<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Plan {
    /// A plan for the build file at `file` with the given contents
    pub fn new(file: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            scope: Arc::new(PlanScope::new(file, digest(content.as_bytes()))),
            imports: HashMap::new(),
            factories: Mutex::new(BTreeMap::new()),
            evaluated: Mutex::new(HashMap::new()),
            resolving: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_imports(mut self, imports: HashMap<String, Arc<Plan>>) -> Self {
        self.imports = imports;
        self
    }

    pub fn scope(&self) -> &Arc<PlanScope> {
        &self.scope
    }

    /// The build file this plan was loaded from
    pub fn path(&self) -> &Path {
        self.scope.file()
    }

    pub fn dir(&self) -> &Path {
        self.scope.dir()
    }

    pub fn build_dir(&self) -> &Path {
        self.scope.build_dir()
    }

    pub fn content_version(&self) -> &str {
        self.scope.version()
    }

    /// `name` resolved against the plan directory
    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir().join(name)
    }

    /// Files matching `pattern` below the plan directory, sorted
    pub fn glob(&self, pattern: &str) -> RmkResult<Vec<PathBuf>> {
        let full = self.file(pattern);
        let invalid = |reason: String| RmkError::PlanInvalid {
            path: self.path().to_path_buf(),
            reason,
        };
        let full = full
            .to_str()
            .ok_or_else(|| invalid(format!("non UTF-8 pattern {}", full.display())))?;
        let mut paths: Vec<PathBuf> = glob::glob(full)
            .map_err(|e| invalid(format!("bad pattern '{}': {}", pattern, e)))?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// The plan imported under `alias`
    pub fn project(&self, alias: &str) -> RmkResult<&Arc<Plan>> {
        self.imports.get(alias).ok_or_else(|| RmkError::UnknownImport {
            alias: alias.to_string(),
            plan: self.path().to_path_buf(),
        })
    }

    /// Create a job owned by this plan
    pub fn job<F, Fut>(&self, name: &str, depends: Vec<Dep>, f: F) -> RmkResult<Job>
    where
        F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RmkResult<Value>> + Send + 'static,
    {
        self.job_with_includes(name, depends, Vec::new(), f)
    }

    /// Create a job with order-only dependencies in `includes`
    pub fn job_with_includes<F, Fut>(
        &self,
        name: &str,
        depends: Vec<Dep>,
        includes: Vec<Dep>,
        f: F,
    ) -> RmkResult<Job>
    where
        F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RmkResult<Value>> + Send + 'static,
    {
        Job::new(name, self.scope.clone(), depends, includes, work(f))
    }

    /// Register (or replace) the factory for task `name`
    pub fn register_task<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Plan) -> RmkResult<Vec<Dep>> + Send + Sync + 'static,
    {
        locked(&self.factories).insert(name.to_string(), Arc::new(factory));
    }

    /// Evaluate task `name`, once per plan
    pub fn task(&self, name: &str) -> RmkResult<Vec<Dep>> {
        if let Some(deps) = locked(&self.evaluated).get(name) {
            return Ok(deps.clone());
        }
        let factory = locked(&self.factories)
            .get(name)
            .cloned()
            .ok_or_else(|| RmkError::UnknownTask {
                task: name.to_string(),
                plan: self.path().to_path_buf(),
            })?;

        if !locked(&self.resolving).insert(name.to_string()) {
            return Err(RmkError::PlanInvalid {
                path: self.path().to_path_buf(),
                reason: format!("'{}' depends on itself", name),
            });
        }
        let result = factory(self);
        locked(&self.resolving).remove(name);

        let deps = result?;
        locked(&self.evaluated).insert(name.to_string(), deps.clone());
        Ok(deps)
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("file", &self.path())
            .field("version", &self.content_version())
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .finish()
    }
}

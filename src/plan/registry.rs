//! Loading and memoising plans

use super::{BuildFile, GitCheckouts, Location, Plan, PlanImport};
use crate::error::{RmkError, RmkResult};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tracing::debug;

/// Build file looked up when a reference names a directory
pub const BUILD_FILE: &str = "build.toml";

/// All plans loaded during a run, keyed by absolute build file path
pub struct PlanRegistry {
    build_file: String,
    checkouts: GitCheckouts,
    plans: Mutex<HashMap<PathBuf, Arc<Plan>>>,
    loading: Mutex<HashSet<PathBuf>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl PlanRegistry {
    pub fn new(checkouts: GitCheckouts) -> Self {
        Self {
            build_file: BUILD_FILE.to_string(),
            checkouts,
            plans: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    /// Look up `name` instead of `build.toml` in directories
    pub fn with_build_file(mut self, name: impl Into<String>) -> Self {
        self.build_file = name.into();
        self
    }

    pub fn build_file(&self) -> &str {
        &self.build_file
    }

    /// Number of plans loaded so far
    pub fn len(&self) -> usize {
        locked(&self.plans).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the plan `reference` names, relative to `base`.
    ///
    /// `base` is a directory or a git reference (see [`Location`]), in
    /// which case the repository is checked out first. A reference naming
    /// a directory loads the build file inside it. Loading the same file
    /// twice returns the same plan.
    pub async fn load(&self, reference: &str, base: &str) -> RmkResult<Arc<Plan>> {
        self.load_boxed(reference.to_string(), base.to_string()).await
    }

    fn load_boxed(&self, reference: String, base: String) -> BoxFuture<'_, RmkResult<Arc<Plan>>> {
        async move {
            let base_dir = match Location::parse(&base) {
                Location::Local(dir) => dir,
                Location::Git(remote) => self.checkouts.materialize(&remote).await?,
            };

            let mut path = base_dir.join(&reference);
            if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
                path = path.join(&self.build_file);
            }
            let path = fs::canonicalize(&path)
                .await
                .map_err(|_| RmkError::PlanNotFound(path.clone()))?;

            if let Some(plan) = locked(&self.plans).get(&path) {
                return Ok(plan.clone());
            }
            if !locked(&self.loading).insert(path.clone()) {
                return Err(RmkError::PlanCycle(path));
            }
            let loaded = self.read_plan(&path).await;
            locked(&self.loading).remove(&path);

            let plan = loaded?;
            locked(&self.plans).insert(path, plan.clone());
            Ok(plan)
        }
        .boxed()
    }

    async fn read_plan(&self, path: &Path) -> RmkResult<Arc<Plan>> {
        debug!("Loading {}", path.display());
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| RmkError::io(format!("reading {}", path.display()), e))?;
        let build = BuildFile::parse(&text, path)?;

        let dir = path
            .parent()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let mut imports = HashMap::new();
        for (alias, import) in build.imports() {
            let plan = match import {
                PlanImport::Path(reference) => self.load_boxed(reference.clone(), dir.clone()),
                PlanImport::Git { git, path } => self.load_boxed(
                    path.clone().unwrap_or_else(|| ".".to_string()),
                    git.clone(),
                ),
            }
            .await?;
            imports.insert(alias.clone(), plan);
        }

        let plan = Plan::new(path, &text).with_imports(imports);
        build.register(&plan);
        Ok(Arc::new(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Discard, ProcessRunner, ProcessTable};
    use tempfile::TempDir;

    fn registry(root: &Path) -> PlanRegistry {
        let runner = ProcessRunner::new(ProcessTable::new())
            .with_trace(false)
            .with_console(Arc::new(Discard), Arc::new(Discard));
        PlanRegistry::new(GitCheckouts::new(root.join("checkouts"), runner))
    }

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[tokio::test]
    async fn directories_resolve_to_their_build_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "app/build.toml", "[jobs.a]\ncommand = \"true\"\n");
        let registry = registry(dir.path());

        let base = dir.path().display().to_string();
        let by_dir = registry.load("app", &base).await.unwrap();
        let by_file = registry.load("app/../app/build.toml", &base).await.unwrap();
        assert!(Arc::ptr_eq(&by_dir, &by_file));
        assert_eq!(registry.len(), 1);
        assert!(by_dir.path().ends_with("app/build.toml"));
    }

    #[tokio::test]
    async fn imports_share_jobs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib/build.toml", "[jobs.archive]\ncommand = \"true\"\n");
        write(
            dir.path(),
            "app/build.toml",
            "[plans]\nlib = \"../lib\"\n\n[tasks]\nall = [\"lib:archive\"]\n",
        );
        write(
            dir.path(),
            "tool/build.toml",
            "[plans]\nlib = \"../lib\"\n\n[tasks]\nall = [\"lib:archive\"]\n",
        );
        let registry = registry(dir.path());
        let base = dir.path().display().to_string();

        let app = registry.load("app", &base).await.unwrap();
        let tool = registry.load("tool", &base).await.unwrap();
        let a = app.task("all").unwrap();
        let b = tool.task("all").unwrap();
        assert!(a[0].as_job().unwrap().same(b[0].as_job().unwrap()));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn import_cycles_are_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/build.toml", "[plans]\nb = \"../b\"\n");
        write(dir.path(), "b/build.toml", "[plans]\na = \"../a\"\n");
        let registry = registry(dir.path());

        let err = registry
            .load("a", &dir.path().display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RmkError::PlanCycle(_)));
    }

    #[tokio::test]
    async fn missing_build_file() {
        let dir = TempDir::new().unwrap();
        let err = registry(dir.path())
            .load(".", &dir.path().display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RmkError::PlanNotFound(_)));
    }
}

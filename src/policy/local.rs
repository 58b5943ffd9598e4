use super::{jobs, resolve, BuildPolicy, ModificationTimePolicy};
use crate::error::RmkResult;
use crate::job::{Dep, Scheduler, Value};
use async_trait::async_trait;

/// Always rebuilds the jobs it is asked for, but leaves their
/// dependencies to a [`ModificationTimePolicy`].
#[derive(Clone)]
pub struct LocalPolicy {
    nested: ModificationTimePolicy,
}

impl LocalPolicy {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            nested: ModificationTimePolicy::new(scheduler),
        }
    }
}

#[async_trait]
impl BuildPolicy for LocalPolicy {
    async fn build(&self, deps: &[Dep]) -> RmkResult<Vec<Value>> {
        for job in jobs(deps) {
            if !job.is_scheduled() {
                job.build(&self.nested).await?;
            }
        }
        resolve(deps).await
    }

    fn scheduler(&self) -> &Scheduler {
        self.nested.scheduler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::{counting, quiet_scheduler, scope_in};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn rebuilds_roots_only() {
        let dir = TempDir::new().unwrap();
        let scope = scope_in(dir.path(), "v1");
        let leaves = Arc::new(AtomicUsize::new(0));
        let roots = Arc::new(AtomicUsize::new(0));
        let policy = LocalPolicy::new(quiet_scheduler(2));

        for _ in 0..2 {
            let leaf = counting(&scope, "leaf", vec![], &leaves);
            let root = counting(&scope, "root", vec![leaf.into()], &roots);
            policy.build(&[root.into()]).await.unwrap();
        }
        assert_eq!(roots.load(Ordering::SeqCst), 2);
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
    }
}

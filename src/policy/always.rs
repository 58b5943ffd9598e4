use super::{jobs, resolve, BuildPolicy};
use crate::error::RmkResult;
use crate::job::{Dep, Scheduler, Value};
use async_trait::async_trait;

/// Rebuilds every job once per run, ignoring persisted results
#[derive(Clone, Default)]
pub struct AlwaysPolicy {
    scheduler: Scheduler,
}

impl AlwaysPolicy {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl BuildPolicy for AlwaysPolicy {
    async fn build(&self, deps: &[Dep]) -> RmkResult<Vec<Value>> {
        for job in jobs(deps) {
            if !job.is_scheduled() {
                job.build(self).await?;
            }
        }
        resolve(deps).await
    }

    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

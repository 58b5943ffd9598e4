//! Build policies
//!
//! A policy decides, for every job of a dependency list, whether the
//! persisted result can be reused or the job has to run, then resolves the
//! list to values. Policies recurse into each job's own dependencies
//! through [`Job::build`].

mod always;
mod local;
mod mtime;
mod remote;

pub use always::AlwaysPolicy;
pub use local::LocalPolicy;
pub use mtime::{check_staleness, ModificationTimePolicy, Staleness};
pub use remote::{RemoteCache, RemoteCachePolicy, DEFAULT_RESPONSE_TIMEOUT};

use crate::error::RmkResult;
use crate::job::{Dep, Job, Scheduler, Value};
use async_trait::async_trait;

/// Strategy for bringing jobs up to date
#[async_trait]
pub trait BuildPolicy: Send + Sync {
    /// Make every job in `deps` current and return the values of all
    /// entries, in order. Plain values pass through unchanged.
    async fn build(&self, deps: &[Dep]) -> RmkResult<Vec<Value>>;

    /// Scheduler used for the jobs this policy starts
    fn scheduler(&self) -> &Scheduler;
}

/// Await every entry of `deps`, in order
pub async fn resolve(deps: &[Dep]) -> RmkResult<Vec<Value>> {
    let mut values = Vec::with_capacity(deps.len());
    for dep in deps {
        match dep {
            Dep::Value(value) => values.push(value.clone()),
            Dep::Job(job) => values.push(job.result().await?),
        }
    }
    Ok(values)
}

fn jobs(deps: &[Dep]) -> impl Iterator<Item = &Job> {
    deps.iter().filter_map(Dep::as_job)
}

//! Concurrency limit for job execution

use crate::process::{ProcessRunner, ProcessTable};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of jobs allowed to run at the same time
pub const DEFAULT_CONCURRENCY: usize = 100;

/// Bounds how many jobs execute their work at once and hands each job
/// the process runner it uses for external commands.
#[derive(Clone)]
pub struct Scheduler {
    limit: usize,
    permits: Arc<Semaphore>,
    runner: ProcessRunner,
}

impl Scheduler {
    /// A limit of 0 is treated as 1
    pub fn new(limit: usize, runner: ProcessRunner) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            runner,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// With a limit of one every job is awaited right after it is started
    pub fn is_sequential(&self) -> bool {
        self.limit == 1
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Jobs currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Wait for a free slot. The semaphore is never closed, so `None`
    /// only shows up if that invariant is broken.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, ProcessRunner::new(ProcessTable::new()))
    }
}

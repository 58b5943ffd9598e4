//! Build command - build a task of the plan in a directory

use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::controller::{BuildStatus, Controller};
use crate::error::RmkResult;
use crate::job::Scheduler;
use crate::plan::{GitCheckouts, PlanRegistry};
use crate::policy::RemoteCache;
use crate::process::{ProcessRunner, ProcessTable};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config, verbose: bool) -> RmkResult<BuildStatus> {
    let table = ProcessTable::new();
    let runner = ProcessRunner::new(table.clone())
        .with_trace(config.general.trace && !args.quiet)
        .with_verbose(verbose || config.general.verbose);

    let concurrency = args.jobs.unwrap_or(config.build.concurrency);
    let scheduler = Scheduler::new(concurrency, runner.clone());
    let kind = args.policy.unwrap_or(config.build.policy);
    let remote = args
        .remote
        .or_else(|| config.cache.remote_url.clone())
        .map(|url| {
            RemoteCache::new(url)
                .with_response_timeout(Duration::from_secs(config.cache.timeout_secs))
        });
    let policy = kind.instantiate(scheduler, remote)?;
    debug!("Building with the {} policy, {} jobs at once", kind, concurrency);

    let checkouts = GitCheckouts::new(ConfigManager::checkout_dir(config), runner);
    let registry = PlanRegistry::new(checkouts).with_build_file(
        args.file
            .unwrap_or_else(|| config.build.build_file.clone()),
    );
    let dir = args.directory.unwrap_or_else(|| PathBuf::from("."));
    let task = args.task.unwrap_or_else(|| config.build.task.clone());
    let controller = Controller::new(dir, registry, policy).with_task(task);

    // Ctrl-C terminates running commands; the build then fails normally
    let interrupts = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, terminating {} running commands", table.len());
            table.kill_all();
        }
    });
    let report = controller.run(None, None).await;
    interrupts.abort();

    debug!("{} jobs modified", report.modified);
    Ok(report.status)
}

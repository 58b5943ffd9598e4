//! Table of in-flight child processes
//!
//! Every spawned command registers its pid here so that an operator
//! triggered cancellation can terminate all of them at once. A command
//! whose pid has vanished from the table when it finishes was cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Shared registry of running child processes, keyed by pid
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    inner: Arc<Mutex<HashMap<u32, String>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track `pid` until the returned guard is released or dropped
    pub fn register(&self, pid: u32, command: &str) -> ProcessGuard {
        self.lock().insert(pid, command.to_string());
        ProcessGuard {
            table: self.clone(),
            pid: Some(pid),
        }
    }

    /// Number of tracked processes
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Send SIGTERM to the process group of every tracked process and
    /// forget them all.
    ///
    /// Returns the number of processes signalled. A process that exits
    /// between the snapshot and the signal is not an error.
    pub fn kill_all(&self) -> usize {
        let victims: Vec<(u32, String)> = self.lock().drain().collect();
        for (pid, command) in &victims {
            debug!("Terminating {} ({})", pid, command);
            terminate(*pid);
        }
        victims.len()
    }

    fn remove(&self, pid: u32) -> bool {
        self.lock().remove(&pid).is_some()
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to terminate {}: {}", pid, err);
        }
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    warn!("Cannot signal process {} on this platform", pid);
}

/// Registration of one child in a [`ProcessTable`]
#[derive(Debug)]
pub struct ProcessGuard {
    table: ProcessTable,
    pid: Option<u32>,
}

impl ProcessGuard {
    /// Deregister the process.
    ///
    /// Returns `false` when the entry was already gone, i.e. the process
    /// was cancelled through [`ProcessTable::kill_all`].
    pub fn release(mut self) -> bool {
        match self.pid.take() {
            Some(pid) => self.table.remove(pid),
            None => false,
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            self.table.remove(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_release_reports_presence() {
        let table = ProcessTable::new();
        let guard = table.register(4242, "sleep 10");
        assert_eq!(table.len(), 1);
        assert!(guard.release());
        assert!(table.is_empty());
    }

    #[test]
    fn guard_drop_cleans_up() {
        let table = ProcessTable::new();
        {
            let _guard = table.register(4243, "true");
        }
        assert!(table.is_empty());
    }

    #[test]
    fn removed_entry_counts_as_killed() {
        let table = ProcessTable::new();
        let guard = table.register(u32::MAX, "ghost");
        // pid does not fit pid_t, so nothing is signalled
        assert_eq!(table.kill_all(), 1);
        assert!(!guard.release());
    }
}

//! Best-effort, in-process resource sandbox for dynamically loaded plugin
//! instances.
//!
//! There is no OS-level isolation: a custom plugin runs in the same
//! process and address space as the core. This only bounds misbehavior a
//! cooperating plugin can be caught in — a worker count it registers
//! itself via `PluginContext::track_worker`, and process-wide memory
//! sampled periodically via `sysinfo`, the same crate the teacher's
//! `game_server` health checks use for host metrics.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default quotas, applied unless a plugin's manifest overrides them.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_MAX_WORKERS: u32 = 100;

/// How long a quota must stay violated before the instance is killed.
pub const SUSTAINED_VIOLATION_WINDOW: Duration = Duration::from_secs(10);

/// How often the manager samples a sandboxed instance.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub max_memory_bytes: u64,
    pub max_workers: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

pub struct SandboxMonitor {
    limits: SandboxLimits,
    worker_count: AtomicU32,
    violating_since: Mutex<Option<Instant>>,
}

impl SandboxMonitor {
    pub fn new(limits: SandboxLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            worker_count: AtomicU32::new(0),
            violating_since: Mutex::new(None),
        })
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count.load(Ordering::SeqCst)
    }

    pub(crate) fn track_worker(self: &Arc<Self>) -> WorkerGuard {
        self.worker_count.fetch_add(1, Ordering::SeqCst);
        WorkerGuard(self.clone())
    }

    /// Records a sample of process memory residency (shared across every
    /// plugin in the process, since there is no per-plugin isolation) and
    /// returns true once the violation has been sustained long enough to
    /// warrant killing the instance.
    pub fn sample(&self, process_memory_bytes: u64) -> bool {
        let over =
            self.worker_count() > self.limits.max_workers || process_memory_bytes > self.limits.max_memory_bytes;
        let mut since = self.violating_since.lock().unwrap();
        if !over {
            *since = None;
            return false;
        }
        let start = *since.get_or_insert(Instant::now());
        Instant::now().duration_since(start) >= SUSTAINED_VIOLATION_WINDOW
    }
}

/// Deregisters a tracked worker when the plugin's task exits.
pub struct WorkerGuard(Arc<SandboxMonitor>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.worker_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_under_quota_never_trips() {
        let monitor = SandboxMonitor::new(SandboxLimits::default());
        assert!(!monitor.sample(1024));
    }

    #[test]
    fn worker_over_quota_starts_the_clock_but_does_not_trip_immediately() {
        let monitor = SandboxMonitor::new(SandboxLimits {
            max_memory_bytes: u64::MAX,
            max_workers: 0,
        });
        let _guard = monitor.track_worker();
        assert!(!monitor.sample(0));
    }

    #[test]
    fn dropping_below_quota_resets_the_violation_window() {
        let monitor = SandboxMonitor::new(SandboxLimits {
            max_memory_bytes: 10,
            max_workers: u32::MAX,
        });
        assert!(!monitor.sample(100));
        assert!(!monitor.sample(1));
    }
}

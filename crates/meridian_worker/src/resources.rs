//! Per-job resource accounting (§4.4.3 step 3): each Worker owns its
//! own CPU-time delta and peak RSS, sampled via `sysinfo` the same way
//! the original sampled via `psutil`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sysinfo::{Pid, System};

pub struct ResourceBaseline {
    pid: Pid,
    cpu_time_start: f64,
}

impl ResourceBaseline {
    pub fn capture() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        let cpu_time_start = process_cpu_seconds(&system, pid);
        Self { pid, cpu_time_start }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// CPU seconds consumed since [`capture`](Self::capture).
    pub fn delta_cpu_seconds(&self) -> f64 {
        let mut system = System::new();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
        (process_cpu_seconds(&system, self.pid) - self.cpu_time_start).max(0.0)
    }

    /// Current resident set size, in bytes.
    pub fn current_rss(&self) -> u64 {
        sample_rss(self.pid)
    }
}

/// One-shot RSS sample, in bytes, for `pid`. Shared by
/// [`ResourceBaseline::current_rss`] and [`PeakRssTracker::record`]'s
/// callers so both go through the same `sysinfo` call shape.
pub fn sample_rss(pid: Pid) -> u64 {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

fn process_cpu_seconds(system: &System, pid: Pid) -> f64 {
    system
        .process(pid)
        .map(|p| p.accumulated_cpu_time() as f64 / 1000.0)
        .unwrap_or(0.0)
}

/// Tracks the high-water mark of RSS observed across repeated samples
/// (§4.4.3 step 4: `max(max_memory, rss)` on every poll tick), shared
/// between the cancellation-monitor task and the task awaiting it.
#[derive(Clone)]
pub struct PeakRssTracker {
    peak: Arc<AtomicU64>,
}

impl PeakRssTracker {
    pub fn new(initial: u64) -> Self {
        Self {
            peak: Arc::new(AtomicU64::new(initial)),
        }
    }

    pub fn record(&self, sample: u64) {
        self.peak.fetch_max(sample, Ordering::SeqCst);
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_rss_tracker_keeps_the_maximum() {
        let tracker = PeakRssTracker::new(100);
        tracker.record(50);
        assert_eq!(tracker.peak(), 100);
        tracker.record(250);
        assert_eq!(tracker.peak(), 250);
    }
}

//! Telemetry (§6): periodic CPU/memory/disk snapshots published by the
//! Node Controller alongside worker status reports.
//!
//! CPU percentages are scaled by `cpu_count`, matching the original's
//! `psutil.cpu_times_percent()` members multiplied by `psutil.cpu_count()`
//! (`original_source/CryoCloud/Tools/node.py`, `Node.run`).

use serde::Serialize;
use serde_json::Value;
use sysinfo::{Disks, System};

#[derive(Debug, Clone, Serialize)]
pub struct CpuTimes {
    pub user: f32,
    pub nice: f32,
    pub system: f32,
    pub idle: f32,
    pub iowait: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub total: u64,
    pub available: u64,
    pub active: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskSnapshot {
    pub mount: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub cpu: CpuTimes,
    pub cpu_count: usize,
    pub cpu_count_physical: usize,
    pub memory: MemorySnapshot,
    pub disks: Vec<DiskSnapshot>,
    pub state: String,
}

/// Raw jiffy counters from `/proc/stat`'s aggregate `cpu` line, used to
/// compute `{user,nice,system,idle,iowait}` percentages as a delta
/// between two samples (mirrors what `psutil.cpu_times_percent()` does
/// internally on Linux).
#[derive(Debug, Clone, Copy)]
struct ProcStatSample {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
}

#[cfg(target_os = "linux")]
fn read_proc_stat() -> Option<ProcStatSample> {
    let content = std::fs::read_to_string("/proc/stat").ok()?;
    let line = content.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 5 {
        return None;
    }
    Some(ProcStatSample {
        user: values[0],
        nice: values[1],
        system: values[2],
        idle: values[3],
        iowait: values[4],
    })
}

#[cfg(target_os = "linux")]
fn percentages_from_delta(prev: ProcStatSample, cur: ProcStatSample) -> Option<(f32, f32, f32, f32, f32)> {
    let d_user = cur.user.saturating_sub(prev.user) as f32;
    let d_nice = cur.nice.saturating_sub(prev.nice) as f32;
    let d_system = cur.system.saturating_sub(prev.system) as f32;
    let d_idle = cur.idle.saturating_sub(prev.idle) as f32;
    let d_iowait = cur.iowait.saturating_sub(prev.iowait) as f32;
    let total = d_user + d_nice + d_system + d_idle + d_iowait;
    if total <= 0.0 {
        return None;
    }
    Some((
        d_user / total * 100.0,
        d_nice / total * 100.0,
        d_system / total * 100.0,
        d_idle / total * 100.0,
        d_iowait / total * 100.0,
    ))
}

/// Wraps the `sysinfo` handles the Node Controller needs to keep alive
/// across samples (CPU usage is only meaningful as a delta between two
/// refreshes), plus a raw `/proc/stat` sample on Linux for the
/// per-category breakdown `sysinfo` itself doesn't expose.
pub struct TelemetrySampler {
    system: System,
    #[cfg(target_os = "linux")]
    prev_proc_stat: Option<ProcStatSample>,
}

impl TelemetrySampler {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        Self {
            system,
            #[cfg(target_os = "linux")]
            prev_proc_stat: read_proc_stat(),
        }
    }

    /// Running inside a container suppresses telemetry publication
    /// (§6) while supervision continues unaffected.
    pub fn running_in_container() -> bool {
        std::path::Path::new("/.dockerenv").exists()
            || std::fs::read_to_string("/proc/1/cgroup")
                .map(|s| s.contains("docker") || s.contains("kubepods"))
                .unwrap_or(false)
    }

    pub fn sample(&mut self, cpu_override: Option<usize>) -> TelemetrySnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let n = cpus.len().max(1) as f32;
        let avg_usage: f32 = cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / n;
        let idle_pct = (100.0 - avg_usage).max(0.0);

        let cpu_count = cpu_override.unwrap_or(cpus.len());
        let cpu_count_physical = self.system.physical_core_count().unwrap_or(cpu_count);
        let scale = cpu_count as f32;

        #[cfg(target_os = "linux")]
        let (user_pct, nice_pct, system_pct, idle_pct, iowait_pct) = {
            let cur = read_proc_stat();
            let percentages = match (self.prev_proc_stat, cur) {
                (Some(prev), Some(cur)) => percentages_from_delta(prev, cur),
                _ => None,
            };
            self.prev_proc_stat = cur;
            percentages.unwrap_or((avg_usage, 0.0, 0.0, idle_pct, 0.0))
        };
        #[cfg(not(target_os = "linux"))]
        let (user_pct, nice_pct, system_pct, idle_pct, iowait_pct) = (avg_usage, 0.0, 0.0, idle_pct, 0.0);

        let cpu = CpuTimes {
            user: user_pct * scale,
            nice: nice_pct * scale,
            system: system_pct * scale,
            idle: idle_pct * scale,
            iowait: iowait_pct * scale,
        };

        let memory = MemorySnapshot {
            total: self.system.total_memory(),
            available: self.system.available_memory(),
            active: self.system.used_memory(),
        };

        let disks = Disks::new_with_refreshed_list()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space();
                let used = total.saturating_sub(free);
                let percent = if total > 0 {
                    used as f32 / total as f32 * 100.0
                } else {
                    0.0
                };
                DiskSnapshot {
                    mount: d.mount_point().to_string_lossy().into_owned(),
                    total,
                    used,
                    free,
                    percent,
                }
            })
            .collect();

        TelemetrySnapshot {
            cpu,
            cpu_count,
            cpu_count_physical,
            memory,
            disks,
            state: "running".to_string(),
        }
    }
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySnapshot {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reports_sane_cpu_percentages() {
        let mut sampler = TelemetrySampler::new();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let snapshot = sampler.sample(None);
        let bound = 100.0 * snapshot.cpu_count.max(1) as f32;
        assert!(snapshot.cpu.idle >= 0.0 && snapshot.cpu.idle <= bound);
        assert!(snapshot.cpu_count >= 1);
    }

    #[test]
    fn cpu_override_replaces_detected_count() {
        let mut sampler = TelemetrySampler::new();
        let snapshot = sampler.sample(Some(64));
        assert_eq!(snapshot.cpu_count, 64);
    }

    #[test]
    fn cpu_percentages_are_scaled_by_cpu_count() {
        let mut sampler = TelemetrySampler::new();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let scaled = sampler.sample(Some(8));
        assert!(scaled.cpu.idle <= 800.0);
        assert!(scaled.cpu.user <= 800.0);
        assert_eq!(scaled.cpu_count, 8);
    }

    #[test]
    fn to_json_produces_expected_keys() {
        let mut sampler = TelemetrySampler::new();
        let snapshot = sampler.sample(None);
        let json = snapshot.to_json();
        assert!(json.get("cpu").is_some());
        assert!(json.get("memory").is_some());
        assert!(json.get("state").is_some());
    }
}

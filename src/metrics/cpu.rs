//! CPU usage from /proc/stat, combined with temperature, memory and process counts.

use super::memory;
use super::process;
use super::source::{SourceError, SysRoot};
use super::thermal::ThermalReader;
use log::debug;
use serde::Serialize;
use std::time::Duration;

/// Raw CPU time values from the aggregate `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        [self.nice, self.system, self.idle, self.iowait, self.irq, self.softirq]
            .iter()
            .fold(self.user, |sum, v| sum.saturating_add(*v))
    }
}

/// CPU-side metrics for one tick; each value degrades on its own
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuMetrics {
    /// Busy share of CPU time since the previous tick
    pub usage_percent: Option<u8>,
    /// First plausible thermal sensor reading
    pub temperature_celsius: Option<f64>,
    /// Share of physical memory not available to new allocations
    pub memory_percent: Option<u8>,
    /// Live threads in this process
    pub thread_count: Option<u32>,
    /// Open descriptors in this process (or system-wide as a fallback)
    pub handle_count: Option<u32>,
}

/// CPU metrics collector with state for delta calculations
pub struct CpuCollector {
    root: SysRoot,
    prev_times: Option<CpuTimes>,
    thermal: ThermalReader,
}

impl CpuCollector {
    pub fn new(root: SysRoot, thermal_shell_timeout: Duration) -> Self {
        Self {
            thermal: ThermalReader::new(root.clone(), thermal_shell_timeout),
            root,
            prev_times: None,
        }
    }

    pub fn update(&mut self) -> CpuMetrics {
        let usage_percent = match read_cpu_times(&self.root) {
            Ok(times) => self.usage(times),
            Err(e) => {
                debug!("cpu usage unavailable: {}", e);
                None
            }
        };

        let memory_percent = match memory::read_meminfo(&self.root) {
            Ok(info) => info.used_percent(),
            Err(e) => {
                debug!("memory usage unavailable: {}", e);
                None
            }
        };

        CpuMetrics {
            usage_percent,
            temperature_celsius: self.thermal.read(),
            memory_percent,
            thread_count: process::thread_count(&self.root),
            handle_count: process::handle_count(&self.root),
        }
    }

    fn usage(&mut self, times: CpuTimes) -> Option<u8> {
        let prev = match self.prev_times {
            Some(prev) => prev,
            None => {
                self.prev_times = Some(times);
                return None;
            }
        };

        let usage = usage_percent(&prev, &times);
        // identical readings keep the old baseline so the next real delta is not lost
        if times.total() != prev.total() {
            self.prev_times = Some(times);
        }
        usage
    }
}

/// `round(100 * (Δtotal - Δidle - Δiowait) / Δtotal)`, `None` unless Δtotal > 0
pub fn usage_percent(prev: &CpuTimes, curr: &CpuTimes) -> Option<u8> {
    let total_delta = curr.total().checked_sub(prev.total()).filter(|d| *d > 0)?;
    let idle_delta = curr.idle.saturating_sub(prev.idle);
    let iowait_delta = curr.iowait.saturating_sub(prev.iowait);

    let busy = total_delta.saturating_sub(idle_delta + iowait_delta);
    let pct = (100.0 * busy as f64 / total_delta as f64).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

fn read_cpu_times(root: &SysRoot) -> Result<CpuTimes, SourceError> {
    const PATH: &str = "proc/stat";
    let content = root.read(PATH)?;
    content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .and_then(parse_cpu_line)
        .ok_or_else(|| SourceError::parse(root.path(PATH), "aggregate cpu line"))
}

/// Parse `cpu  user nice system idle iowait irq softirq ...`; later columns are ignored
pub fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1) // Skip "cpu"
        .take(7)
        .map(|s| s.parse().ok())
        .collect::<Option<Vec<u64>>>()?;

    if parts.len() < 7 {
        return None;
    }

    Some(CpuTimes {
        user: parts[0],
        nice: parts[1],
        system: parts[2],
        idle: parts[3],
        iowait: parts[4],
        irq: parts[5],
        softirq: parts[6],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::source::testing::FakeRoot;

    fn collector(fake: &FakeRoot) -> CpuCollector {
        CpuCollector::new(fake.root(), Duration::from_millis(500))
    }

    #[test]
    fn usage_from_two_stat_lines() {
        let prev = parse_cpu_line("cpu 100 0 50 800 50 0 0").unwrap();
        let curr = parse_cpu_line("cpu 110 0 55 840 55 0 0").unwrap();
        assert_eq!(usage_percent(&prev, &curr), Some(25));
    }

    #[test]
    fn usage_guarded_against_zero_total_delta() {
        let t = parse_cpu_line("cpu 1 2 3 4 5 6 7").unwrap();
        assert_eq!(usage_percent(&t, &t), None);
    }

    #[test]
    fn parses_kernel_line_with_extra_columns() {
        let t = parse_cpu_line("cpu  4705 356 584 3699176 23060 0 277 0 0 0").unwrap();
        assert_eq!(t.user, 4705);
        assert_eq!(t.softirq, 277);
        assert_eq!(t.total(), 4705 + 356 + 584 + 3699176 + 23060 + 277);
    }

    #[test]
    fn huge_counters_saturate_instead_of_overflowing() {
        let t = parse_cpu_line(&format!("cpu {} {} 0 0 0 0 0", u64::MAX, u64::MAX)).unwrap();
        assert_eq!(t.total(), u64::MAX);
        assert_eq!(usage_percent(&t, &t), None);
    }

    #[test]
    fn rejects_short_or_malformed_line() {
        assert!(parse_cpu_line("cpu 1 2 3").is_none());
        assert!(parse_cpu_line("cpu 1 2 x 4 5 6 7").is_none());
    }

    #[test]
    fn collector_reports_usage_from_second_sample() {
        let fake = FakeRoot::new();
        fake.write("proc/stat", "cpu 100 0 50 800 50 0 0\ncpu0 100 0 50 800 50 0 0\nctxt 5\n");
        let mut collector = collector(&fake);
        assert_eq!(collector.update().usage_percent, None);

        fake.write("proc/stat", "cpu 110 0 55 840 55 0 0\ncpu0 110 0 55 840 55 0 0\nctxt 9\n");
        assert_eq!(collector.update().usage_percent, Some(25));
    }

    #[test]
    fn sub_metrics_degrade_independently() {
        let fake = FakeRoot::new();
        fake.write("proc/meminfo", "MemTotal: 1000 kB\nMemFree: 100 kB\nMemAvailable: 400 kB\n");
        fake.mkdir("proc/self/task", 3);
        let mut collector = collector(&fake);

        let metrics = collector.update();
        assert_eq!(metrics.usage_percent, None);
        assert_eq!(metrics.temperature_celsius, None);
        assert_eq!(metrics.memory_percent, Some(60));
        assert_eq!(metrics.thread_count, Some(3));
        assert_eq!(metrics.handle_count, None);
    }

    #[test]
    fn temperature_reported_alongside_usage() {
        let fake = FakeRoot::new();
        fake.write("proc/stat", "cpu 1 1 1 1 1 1 1\n");
        fake.write("sys/class/thermal/thermal_zone0/temp", "45000\n");
        let mut collector = collector(&fake);
        assert_eq!(collector.update().temperature_celsius, Some(45.0));
    }
}

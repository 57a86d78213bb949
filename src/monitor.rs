//! Ties the three collectors, the scheduler and the probe together.

use crate::config::Config;
use crate::metrics::source::SysRoot;
use crate::metrics::{CpuCollector, CpuMetrics, DiskCollector, DiskMetrics, NetworkCollector, NetworkMetrics};
use crate::probe::{self, ProbeCache, ProbeHandle};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Local};
use log::error;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::watch;

/// Everything collected in one tick
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Local>,
    pub disk: DiskMetrics,
    pub cpu: CpuMetrics,
    pub network: NetworkMetrics,
}

/// Owns one state per collector
pub struct Monitor {
    disk: DiskCollector,
    cpu: CpuCollector,
    network: NetworkCollector,
}

impl Monitor {
    pub fn new(config: &Config, probe_cache: ProbeCache) -> Self {
        let root = SysRoot::new(&config.root);
        Self {
            disk: DiskCollector::new(root.clone(), &config.data_volume),
            cpu: CpuCollector::new(root.clone(), config.thermal_shell_timeout),
            network: NetworkCollector::new(root, probe_cache),
        }
    }

    /// Update every collector once. A collector that panics reports
    /// degraded values; the others are unaffected.
    pub fn sample(&mut self) -> Snapshot {
        let disk = isolate("disk", || self.disk.update());
        let cpu = isolate("cpu", || self.cpu.update());
        let network = isolate("network", || self.network.update());

        Snapshot {
            taken_at: Local::now(),
            disk,
            cpu,
            network,
        }
    }

    /// Start sampling every `config.interval`, plus the probe when enabled
    pub fn start(config: &Config) -> MonitorHandle {
        let cache = ProbeCache::new();
        let probe = config
            .probe
            .clone()
            .map(|probe_config| probe::spawn(probe_config, cache.clone()));

        let mut monitor = Monitor::new(config, cache);
        let (publisher, snapshots) = watch::channel(None);
        let scheduler = Scheduler::start(config.interval, move || {
            publisher.send_replace(Some(monitor.sample()));
        });

        MonitorHandle {
            scheduler,
            probe,
            snapshots,
        }
    }
}

/// Run one collector update, converting a panic into a degraded result
pub fn isolate<T: Default>(name: &str, update: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(update)) {
        Ok(metrics) => metrics,
        Err(_) => {
            error!("{} collector failed; reporting degraded values", name);
            T::default()
        }
    }
}

/// Run `f` with panic messages sent to the log instead of stderr
pub fn with_panics_logged<T>(f: impl FnOnce() -> T) -> T {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(|info| error!("{}", info)));
    let result = f();
    panic::set_hook(previous);
    result
}

/// A running monitor
pub struct MonitorHandle {
    scheduler: Scheduler,
    probe: Option<ProbeHandle>,
    snapshots: watch::Receiver<Option<Snapshot>>,
}

impl MonitorHandle {
    /// Latest snapshot, `None` until the first tick completed
    pub fn snapshots(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshots.clone()
    }

    /// Stop sampling and probing. No snapshot is published after this returns.
    pub async fn stop(self) {
        self.scheduler.stop().await;
        if let Some(probe) = self.probe {
            probe.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::source::testing::FakeRoot;
    use std::time::Duration;

    fn fake_config(fake: &FakeRoot) -> Config {
        Config {
            interval: Duration::from_millis(10),
            root: fake.path().to_path_buf(),
            data_volume: fake.path().to_path_buf(),
            probe: None,
            ..Config::default()
        }
    }

    #[test]
    fn panicking_collector_degrades() {
        let metrics: CpuMetrics = isolate("cpu", || panic!("boom"));
        assert_eq!(metrics, CpuMetrics::default());

        let network: NetworkMetrics = isolate("network", || panic!("boom"));
        assert_eq!(network.latency_ms, "--");
        assert_eq!(network.active_connections, 0);
    }

    #[test]
    fn panics_are_contained_while_logged() {
        let metrics: DiskMetrics = with_panics_logged(|| isolate("disk", || panic!("boom")));
        assert_eq!(metrics, DiskMetrics::default());

        // the regular hook is back afterwards
        let outcome = panic::catch_unwind(|| with_panics_logged(|| 7));
        assert_eq!(outcome.ok(), Some(7));
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let fake = FakeRoot::new();
        let snapshot = Monitor::new(&fake_config(&fake), ProbeCache::new()).sample();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["network"]["latency_ms"], "--");
        assert_eq!(json["disk"]["rate_source_available"], false);
        assert!(json["cpu"]["usage_percent"].is_null());
    }

    #[test]
    fn empty_root_degrades_everything_but_still_samples() {
        let fake = FakeRoot::new();
        let mut monitor = Monitor::new(&fake_config(&fake), ProbeCache::new());
        let snapshot = monitor.sample();

        assert_eq!(snapshot.disk.read_write_rate, None);
        assert_eq!(snapshot.cpu.usage_percent, None);
        assert_eq!(snapshot.cpu.memory_percent, None);
        assert_eq!(snapshot.network.bandwidth, None);
        assert_eq!(snapshot.network.active_connections, 0);
        assert_eq!(snapshot.network.packet_loss, "--");
    }

    #[test]
    fn rates_appear_from_second_sample() {
        let fake = FakeRoot::new();
        fake.write("proc/stat", "cpu 100 0 50 800 50 0 0\n");
        fake.write("proc/self/io", "read_bytes: 0\nwrite_bytes: 0\n");
        let mut monitor = Monitor::new(&fake_config(&fake), ProbeCache::new());

        let first = monitor.sample();
        assert_eq!(first.cpu.usage_percent, None);
        assert_eq!(first.disk.read_write_rate, None);

        fake.write("proc/stat", "cpu 110 0 55 840 55 0 0\n");
        fake.write("proc/self/io", "read_bytes: 1048576\nwrite_bytes: 0\n");
        let second = monitor.sample();
        assert_eq!(second.cpu.usage_percent, Some(25));
        assert!(second.disk.read_write_rate.is_some());
    }

    #[tokio::test]
    async fn no_snapshot_after_stop() {
        let fake = FakeRoot::new();
        let handle = Monitor::start(&fake_config(&fake));
        let mut snapshots = handle.snapshots();

        snapshots.changed().await.unwrap();
        assert!(snapshots.borrow_and_update().is_some());

        handle.stop().await;
        let last = snapshots.borrow_and_update().as_ref().map(|s| s.taken_at);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(snapshots.borrow().as_ref().map(|s| s.taken_at), last);
        assert!(snapshots.changed().await.is_err());
    }
}

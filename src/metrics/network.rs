//! Network bandwidth from /proc/net/dev, active connections from the socket tables,
//! latency and packet loss from the background ping probe.

use super::rate::RateTracker;
use super::source::{MetricSource, ReadStrategy, SourceError, SysRoot};
use crate::probe::ProbeCache;
use log::debug;
use serde::Serialize;
use std::time::Instant;

const BYTES_PER_KB: f64 = 1024.0;

/// Placeholder for a probe value that has never been measured
pub const NOT_MEASURED: &str = "--";

/// Network metrics for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkMetrics {
    /// Download and upload throughput in KB/s
    pub bandwidth: Option<(f64, f64)>,
    /// Interface counters were readable this tick, even if they only set a baseline
    pub bandwidth_source_available: bool,
    /// Sockets in use across all protocol families
    pub active_connections: u32,
    /// Round-trip time as printed by ping, or "--"
    pub latency_ms: String,
    /// Loss percentage as printed by ping (e.g. "0%"), or "--"
    pub packet_loss: String,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            bandwidth: None,
            bandwidth_source_available: false,
            active_connections: 0,
            latency_ms: NOT_MEASURED.to_string(),
            packet_loss: NOT_MEASURED.to_string(),
        }
    }
}

/// Cumulative byte counters of all non-loopback interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceTotals;

impl ReadStrategy for InterfaceTotals {
    type Value = (u64, u64);

    fn read(&self, root: &SysRoot) -> Result<(u64, u64), SourceError> {
        const PATH: &str = "proc/net/dev";
        let netdev = root.read(PATH)?;

        let mut rx_total: u64 = 0;
        let mut tx_total: u64 = 0;
        let mut interfaces = 0;

        for line in netdev.lines().skip(2) {
            // Skip header lines
            let Some((name, counters)) = line.split_once(':') else {
                continue;
            };
            if name.trim() == "lo" {
                continue;
            }

            let parts: Vec<&str> = counters.split_whitespace().collect();
            if parts.len() < 16 {
                continue;
            }
            let (Ok(rx), Ok(tx)) = (parts[0].parse::<u64>(), parts[8].parse::<u64>()) else {
                continue;
            };
            rx_total = rx_total.saturating_add(rx);
            tx_total = tx_total.saturating_add(tx);
            interfaces += 1;
        }

        if interfaces == 0 {
            return Err(SourceError::parse(root.path(PATH), "interface counters"));
        }
        Ok((rx_total, tx_total))
    }
}

/// How active connections are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSource {
    /// `inuse` counters of /proc/net/sockstat and sockstat6, plus the unix table
    SocketSummary,
    /// Row counts of every per-protocol table
    ProtocolTables,
}

pub const CONNECTION_SOURCES: MetricSource<ConnectionSource> = MetricSource::new(&[
    ConnectionSource::SocketSummary,
    ConnectionSource::ProtocolTables,
]);

const SUMMARY_PROTOCOLS: &[&str] = &[
    "TCP", "UDP", "UDPLITE", "RAW", "TCP6", "UDP6", "UDPLITE6", "RAW6",
];

/// Tables counted row by row; tcp tables are handled separately
const RAW_TABLES: &[&str] = &[
    "proc/net/udp",
    "proc/net/udp6",
    "proc/net/udplite",
    "proc/net/udplite6",
    "proc/net/raw",
    "proc/net/raw6",
    "proc/net/unix",
];

/// TCP state code of listening sockets in /proc/net/tcp
const TCP_LISTEN: &str = "0A";

impl ReadStrategy for ConnectionSource {
    type Value = u64;

    fn read(&self, root: &SysRoot) -> Result<u64, SourceError> {
        match self {
            ConnectionSource::SocketSummary => read_socket_summary(root),
            ConnectionSource::ProtocolTables => read_protocol_tables(root),
        }
    }
}

fn read_socket_summary(root: &SysRoot) -> Result<u64, SourceError> {
    const PATH: &str = "proc/net/sockstat";
    let v4 = root.read(PATH)?;
    let mut total = sum_in_use(&v4)
        .ok_or_else(|| SourceError::parse(root.path(PATH), "inuse counters"))?;

    match root.read("proc/net/sockstat6") {
        Ok(v6) => total += sum_in_use(&v6).unwrap_or(0),
        Err(e) => debug!("{}", e),
    }
    match root.read("proc/net/unix") {
        Ok(unix) => total += table_rows(&unix),
        Err(e) => debug!("{}", e),
    }
    Ok(total)
}

fn read_protocol_tables(root: &SysRoot) -> Result<u64, SourceError> {
    let mut total: u64 = 0;
    let mut readable = 0;

    for table in ["proc/net/tcp", "proc/net/tcp6"] {
        match root.read(table) {
            Ok(content) => {
                total += tcp_connections(&content);
                readable += 1;
            }
            Err(e) => debug!("{}", e),
        }
    }
    for table in RAW_TABLES {
        match root.read(table) {
            Ok(content) => {
                total += table_rows(&content);
                readable += 1;
            }
            Err(e) => debug!("{}", e),
        }
    }

    if readable == 0 {
        return Err(SourceError::parse(root.path("proc/net"), "protocol tables"));
    }
    Ok(total)
}

/// Sum `inuse` of the counted protocols, e.g. `TCP: inuse 12 orphan 0 tw 3`.
/// `None` when no counted protocol line is present.
pub fn sum_in_use(content: &str) -> Option<u64> {
    let mut found = false;
    let mut total: u64 = 0;

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let Some(protocol) = tokens.next().and_then(|p| p.strip_suffix(':')) else {
            continue;
        };
        if !SUMMARY_PROTOCOLS.contains(&protocol) {
            continue;
        }

        let parts: Vec<&str> = tokens.collect();
        let in_use = parts
            .iter()
            .position(|t| *t == "inuse")
            .and_then(|i| parts.get(i + 1))
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(n) = in_use {
            total += n;
            found = true;
        }
    }

    found.then_some(total)
}

/// Non-empty rows after the header line
pub fn table_rows(content: &str) -> u64 {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count() as u64
}

/// TCP rows whose state (4th column) is not LISTEN
pub fn tcp_connections(content: &str) -> u64 {
    content
        .lines()
        .skip(1)
        .filter(|line| {
            line.split_whitespace()
                .nth(3)
                .is_some_and(|state| !state.eq_ignore_ascii_case(TCP_LISTEN))
        })
        .count() as u64
}

/// Network metrics collector with state for rate calculations
pub struct NetworkCollector {
    root: SysRoot,
    bandwidth: RateTracker<InterfaceTotals>,
    probe: ProbeCache,
}

impl NetworkCollector {
    pub fn new(root: SysRoot, probe: ProbeCache) -> Self {
        Self {
            root,
            bandwidth: RateTracker::new(BYTES_PER_KB),
            probe,
        }
    }

    pub fn update(&mut self) -> NetworkMetrics {
        self.update_at(Instant::now())
    }

    pub fn update_at(&mut self, now: Instant) -> NetworkMetrics {
        let (bandwidth, bandwidth_source_available) = match InterfaceTotals.read(&self.root) {
            Ok(bytes) => (self.bandwidth.observe(InterfaceTotals, bytes, now), true),
            Err(e) => {
                debug!("bandwidth unavailable: {}", e);
                (None, false)
            }
        };

        let active_connections = CONNECTION_SOURCES
            .read_first(&self.root)
            .map(|(_, n)| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0);

        let probe = self.probe.snapshot();
        if let Some(at) = probe.captured_at {
            debug!("probe result is {:?} old", now.saturating_duration_since(at));
        }

        NetworkMetrics {
            bandwidth,
            bandwidth_source_available,
            active_connections,
            latency_ms: probe.latency_ms.unwrap_or_else(|| NOT_MEASURED.to_string()),
            packet_loss: probe.packet_loss.unwrap_or_else(|| NOT_MEASURED.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::source::testing::FakeRoot;
    use crate::probe::ProbeReading;
    use std::time::Duration;

    fn net_dev(eth_rx: u64, eth_tx: u64) -> String {
        format!(
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
             lo: 999999 10 0 0 0 0 0 0 999999 10 0 0 0 0 0 0\n  \
             eth0: {} 100 0 0 0 0 0 0 {} 80 0 0 0 0 0 0\n  \
             wlan0: 1024 5 0 0 0 0 0 0 2048 5 0 0 0 0 0 0\n",
            eth_rx, eth_tx
        )
    }

    const SOCKSTAT: &str = "sockets: used 290\nTCP: inuse 12 orphan 0 tw 3 alloc 15 mem 2\nUDP: inuse 4 mem 1\nUDPLITE: inuse 0\nRAW: inuse 1\nFRAG: inuse 7 memory 0\n";
    const SOCKSTAT6: &str = "TCP6: inuse 3\nUDP6: inuse 2\nUDPLITE6: inuse 0\nRAW6: inuse 0\nFRAG6: inuse 0 memory 0\n";
    const UNIX: &str = "Num       RefCount Protocol Flags    Type St Inode Path\n0000000000000000: 00000002 00000000 00010000 0001 01 20512 /run/systemd/notify\n0000000000000000: 00000003 00000000 00000000 0001 03 31999\n";
    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   0: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1\n   1: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 2\n   2: 0100007F:C350 0100007F:1F90 06 00000000:00000000 00:00000000 00000000  1000        0 3\n";
    const UDP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops\n  1: 00000000:0044 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 4 2 0 0\n";

    fn collector(fake: &FakeRoot) -> NetworkCollector {
        NetworkCollector::new(fake.root(), ProbeCache::new())
    }

    #[test]
    fn sums_non_loopback_interfaces() {
        let fake = FakeRoot::new();
        fake.write("proc/net/dev", &net_dev(4096, 1024));
        assert_eq!(InterfaceTotals.read(&fake.root()).unwrap(), (4096 + 1024, 1024 + 2048));
    }

    #[test]
    fn bandwidth_rate_in_kilobytes() {
        let fake = FakeRoot::new();
        fake.write("proc/net/dev", &net_dev(0, 0));
        let mut collector = collector(&fake);
        let t0 = Instant::now();
        let baseline = collector.update_at(t0);
        assert_eq!(baseline.bandwidth, None);
        assert!(baseline.bandwidth_source_available);

        fake.write("proc/net/dev", &net_dev(20 * 1024, 4 * 1024));
        let metrics = collector.update_at(t0 + Duration::from_secs(2));
        assert_eq!(metrics.bandwidth, Some((10.0, 2.0)));
    }

    #[test]
    fn summary_counts_in_use_and_unix_rows() {
        let fake = FakeRoot::new();
        fake.write("proc/net/sockstat", SOCKSTAT);
        fake.write("proc/net/sockstat6", SOCKSTAT6);
        fake.write("proc/net/unix", UNIX);
        fake.write("proc/net/tcp", TCP);
        // 12 + 4 + 0 + 1 + 3 + 2 + 2 unix rows; FRAG is not a socket
        assert_eq!(
            CONNECTION_SOURCES.read_first(&fake.root()),
            Some((ConnectionSource::SocketSummary, 24))
        );
    }

    #[test]
    fn summary_without_v6_still_counts() {
        let fake = FakeRoot::new();
        fake.write("proc/net/sockstat", SOCKSTAT);
        assert_eq!(read_socket_summary(&fake.root()).unwrap(), 17);
    }

    #[test]
    fn tables_used_when_summary_absent() {
        let fake = FakeRoot::new();
        fake.write("proc/net/tcp", TCP);
        fake.write("proc/net/udp", UDP);
        fake.write("proc/net/unix", UNIX);
        // 2 non-listening tcp rows + 1 udp row + 2 unix rows
        assert_eq!(
            CONNECTION_SOURCES.read_first(&fake.root()),
            Some((ConnectionSource::ProtocolTables, 5))
        );
        assert_eq!(collector(&fake).update().active_connections, 5);
    }

    #[test]
    fn unparseable_summary_falls_back() {
        let fake = FakeRoot::new();
        fake.write("proc/net/sockstat", "sockets: used 3\n");
        fake.write("proc/net/udp", UDP);
        assert_eq!(
            CONNECTION_SOURCES.read_first(&fake.root()),
            Some((ConnectionSource::ProtocolTables, 1))
        );
    }

    #[test]
    fn no_socket_source_counts_zero() {
        let fake = FakeRoot::new();
        let metrics = collector(&fake).update();
        assert_eq!(metrics.active_connections, 0);
        assert_eq!(metrics.bandwidth, None);
        assert!(!metrics.bandwidth_source_available);
    }

    #[test]
    fn probe_values_come_from_cache() {
        let fake = FakeRoot::new();
        let cache = ProbeCache::new();
        let mut collector = NetworkCollector::new(fake.root(), cache.clone());

        let metrics = collector.update();
        assert_eq!(metrics.latency_ms, "--");
        assert_eq!(metrics.packet_loss, "--");

        cache.publish(
            cache.generation(),
            ProbeReading {
                latency_ms: Some("23.4".to_string()),
                packet_loss: Some("0%".to_string()),
            },
        );
        let metrics = collector.update();
        assert_eq!(metrics.latency_ms, "23.4");
        assert_eq!(metrics.packet_loss, "0%");
    }
}

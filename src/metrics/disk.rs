//! Disk throughput from /proc/self/io or block-device stats, plus data-volume utilization.

use super::rate::RateTracker;
use super::source::{field, MetricSource, ReadStrategy, SourceError, SysRoot};
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Block devices report sectors of this size regardless of hardware geometry
const SECTOR_SIZE: u64 = 512;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Where cumulative read/write byte counters come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskSource {
    /// Per-process I/O accounting
    ProcessIo,
    /// `/sys/block/<device>/stat`
    BlockDevice(&'static str),
}

/// Throughput sources in priority order
pub const DISK_SOURCES: MetricSource<DiskSource> = MetricSource::new(&[
    DiskSource::ProcessIo,
    DiskSource::BlockDevice("dm-0"),
    DiskSource::BlockDevice("sda"),
    DiskSource::BlockDevice("mmcblk0"),
]);

impl ReadStrategy for DiskSource {
    type Value = (u64, u64);

    fn read(&self, root: &SysRoot) -> Result<(u64, u64), SourceError> {
        match self {
            DiskSource::ProcessIo => read_process_io(root),
            DiskSource::BlockDevice(device) => read_block_device(root, device),
        }
    }
}

/// Disk metrics for one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskMetrics {
    /// Read and write throughput in MB/s
    pub read_write_rate: Option<(f64, f64)>,
    /// Some throughput source was readable this tick, even if it only set a baseline
    pub rate_source_available: bool,
    /// Used share of the data volume
    pub utilization_percent: Option<u8>,
}

/// Disk metrics collector with state for rate calculations
pub struct DiskCollector {
    root: SysRoot,
    data_volume: PathBuf,
    throughput: RateTracker<DiskSource>,
}

impl DiskCollector {
    pub fn new(root: SysRoot, data_volume: impl Into<PathBuf>) -> Self {
        Self {
            root,
            data_volume: data_volume.into(),
            throughput: RateTracker::new(BYTES_PER_MB),
        }
    }

    pub fn update(&mut self) -> DiskMetrics {
        self.update_at(Instant::now())
    }

    pub fn update_at(&mut self, now: Instant) -> DiskMetrics {
        let (read_write_rate, rate_source_available) = match DISK_SOURCES.read_first(&self.root) {
            Some((source, bytes)) => (self.throughput.observe(source, bytes, now), true),
            None => {
                debug!("no disk throughput source readable");
                (None, false)
            }
        };

        let utilization_percent = match volume_usage(&self.data_volume) {
            Ok(usage) => usage.used_percent(),
            Err(e) => {
                debug!("volume usage unavailable: {}", e);
                None
            }
        };

        DiskMetrics {
            read_write_rate,
            rate_source_available,
            utilization_percent,
        }
    }
}

fn read_process_io(root: &SysRoot) -> Result<(u64, u64), SourceError> {
    const PATH: &str = "proc/self/io";
    let content = root.read(PATH)?;

    let mut read_bytes = None;
    let mut write_bytes = None;
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.first() {
            Some(&"read_bytes:") => read_bytes = parts.get(1).and_then(|s| s.parse().ok()),
            Some(&"write_bytes:") => write_bytes = parts.get(1).and_then(|s| s.parse().ok()),
            _ => {}
        }
    }

    match (read_bytes, write_bytes) {
        (Some(r), Some(w)) => Ok((r, w)),
        _ => Err(SourceError::parse(root.path(PATH), "read_bytes/write_bytes")),
    }
}

/// Sectors read is the 3rd field of a block stat line, sectors written the 7th
fn read_block_device(root: &SysRoot, device: &str) -> Result<(u64, u64), SourceError> {
    let relative = format!("sys/block/{}/stat", device);
    let path = root.path(&relative);
    let content = root.read(&relative)?;
    let parts: Vec<&str> = content.split_whitespace().collect();

    let sectors_read: u64 = field(&parts, 2, &path, "sectors read")?;
    let sectors_written: u64 = field(&parts, 6, &path, "sectors written")?;
    let read_bytes = sectors_read
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| SourceError::parse(&path, "sectors read"))?;
    let written_bytes = sectors_written
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| SourceError::parse(&path, "sectors written"))?;
    Ok((read_bytes, written_bytes))
}

/// Space on a mounted volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl VolumeUsage {
    pub fn used_percent(&self) -> Option<u8> {
        if self.total_bytes == 0 {
            return None;
        }
        let used = self.total_bytes.saturating_sub(self.free_bytes);
        let pct = (100.0 * used as f64 / self.total_bytes as f64).round();
        Some(pct.clamp(0.0, 100.0) as u8)
    }
}

/// Query total and caller-available space with statvfs
pub fn volume_usage(path: &Path) -> Result<VolumeUsage, SourceError> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| SourceError::parse(path, "volume path"))?;
    let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
    if result != 0 {
        return Err(SourceError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }

    let statvfs = unsafe { statvfs.assume_init() };
    let block_size = statvfs.f_frsize as u64;
    Ok(VolumeUsage {
        total_bytes: statvfs.f_blocks as u64 * block_size,
        free_bytes: statvfs.f_bavail as u64 * block_size,
    })
}

//! Memory usage from /proc/meminfo.

use super::source::{SourceError, SysRoot};

/// Total and available physical memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
}

impl MemoryInfo {
    pub fn used_percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let used = self.total.saturating_sub(self.available);
        let pct = (100.0 * used as f64 / self.total as f64).round();
        Some(pct.clamp(0.0, 100.0) as u8)
    }
}

/// Read MemTotal and MemAvailable.
///
/// Kernels older than 3.14 have no MemAvailable; there the estimate is
/// MemFree + Buffers + Cached.
pub fn read_meminfo(root: &SysRoot) -> Result<MemoryInfo, SourceError> {
    const PATH: &str = "proc/meminfo";
    let meminfo = root.read(PATH)?;

    let mut total = None;
    let mut available = None;
    let mut free: u64 = 0;
    let mut buffers: u64 = 0;
    let mut cached: u64 = 0;

    for line in meminfo.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value: u64 = match parts[1].parse::<u64>() {
            Ok(kb) => kb * 1024, // Convert from KB to bytes
            Err(_) => continue,
        };

        match parts[0] {
            "MemTotal:" => total = Some(value),
            "MemAvailable:" => available = Some(value),
            "MemFree:" => free = value,
            "Buffers:" => buffers = value,
            "Cached:" => cached = value,
            _ => {}
        }
    }

    let total = total.ok_or_else(|| SourceError::parse(root.path(PATH), "MemTotal"))?;
    Ok(MemoryInfo {
        total,
        available: available.unwrap_or(free + buffers + cached),
    })
}

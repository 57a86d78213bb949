//! Metrics collection modules for disk, CPU and network telemetry.

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod process;
pub mod rate;
pub mod source;
pub mod thermal;

pub use cpu::{CpuCollector, CpuMetrics};
pub use disk::{DiskCollector, DiskMetrics};
pub use network::{NetworkCollector, NetworkMetrics};

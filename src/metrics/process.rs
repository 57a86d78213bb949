//! Thread and handle counts for the current process from /proc/self.

use super::source::{MetricSource, ReadStrategy, SourceError, SysRoot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSource {
    /// One entry per thread under /proc/self/task
    TaskDir,
    /// `Threads:` line of /proc/self/status
    StatusField,
}

pub const THREAD_SOURCES: MetricSource<ThreadSource> =
    MetricSource::new(&[ThreadSource::TaskDir, ThreadSource::StatusField]);

impl ReadStrategy for ThreadSource {
    type Value = u32;

    fn read(&self, root: &SysRoot) -> Result<u32, SourceError> {
        match self {
            ThreadSource::TaskDir => root.count_entries("proc/self/task").map(saturate),
            ThreadSource::StatusField => {
                const PATH: &str = "proc/self/status";
                let status = root.read(PATH)?;
                status
                    .lines()
                    .find_map(|line| line.strip_prefix("Threads:"))
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| SourceError::parse(root.path(PATH), "Threads"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    /// Open descriptors of this process
    FdDir,
    /// System-wide allocated file handles, first field of /proc/sys/fs/file-nr
    SystemFileNr,
}

pub const HANDLE_SOURCES: MetricSource<HandleSource> =
    MetricSource::new(&[HandleSource::FdDir, HandleSource::SystemFileNr]);

impl ReadStrategy for HandleSource {
    type Value = u32;

    fn read(&self, root: &SysRoot) -> Result<u32, SourceError> {
        match self {
            HandleSource::FdDir => root.count_entries("proc/self/fd").map(saturate),
            HandleSource::SystemFileNr => {
                const PATH: &str = "proc/sys/fs/file-nr";
                let content = root.read(PATH)?;
                content
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| SourceError::parse(root.path(PATH), "allocated handles"))
            }
        }
    }
}

pub fn thread_count(root: &SysRoot) -> Option<u32> {
    THREAD_SOURCES.read_first(root).map(|(_, n)| n)
}

pub fn handle_count(root: &SysRoot) -> Option<u32> {
    HANDLE_SOURCES.read_first(root).map(|(_, n)| n)
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

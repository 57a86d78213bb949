//! Pseudo-file access and ordered fallback chains shared by all collectors.

use log::debug;
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest amount of data taken from a single pseudo-file read.
const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

/// Why a single read strategy produced no value
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {field} in {}", path.display())]
    Parse { path: PathBuf, field: &'static str },

    #[error("implausible value {value} in {}", path.display())]
    Implausible { path: PathBuf, value: f64 },

    #[error("`{program}` failed: {reason}")]
    Process { program: String, reason: String },

    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl SourceError {
    pub fn parse(path: impl Into<PathBuf>, field: &'static str) -> Self {
        SourceError::Parse {
            path: path.into(),
            field,
        }
    }
}

/// Directory under which every pseudo-file path is resolved.
///
/// Production code uses `/`; tests point this at a temporary tree that mimics
/// the parts of `/proc` and `/sys` a collector needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysRoot {
    root: PathBuf,
}

impl SysRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn as_path(&self) -> &Path {
        &self.root
    }

    /// Resolve a path such as `proc/stat` against the root
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    /// Read a pseudo-file in one bounded read
    pub fn read(&self, relative: &str) -> Result<String, SourceError> {
        let path = self.path(relative);
        let io_err = |source| SourceError::Io {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(io_err)?;
        let mut content = String::new();
        file.take(MAX_READ_BYTES)
            .read_to_string(&mut content)
            .map_err(io_err)?;
        Ok(content)
    }

    /// Count the entries of a directory such as `proc/self/fd`
    pub fn count_entries(&self, relative: &str) -> Result<usize, SourceError> {
        let path = self.path(relative);
        let entries = fs::read_dir(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(entries.flatten().count())
    }
}

impl Default for SysRoot {
    fn default() -> Self {
        Self::new("/")
    }
}

/// One way of obtaining a logical metric.
///
/// Strategies are small `Copy` values so a collector can remember which one
/// produced its previous sample and refuse to mix counters across sources.
pub trait ReadStrategy: Copy + PartialEq + Debug + 'static {
    type Value;

    fn read(&self, root: &SysRoot) -> Result<Self::Value, SourceError>;
}

/// Fixed-priority list of strategies for one logical metric
#[derive(Debug, Clone, Copy)]
pub struct MetricSource<S: 'static> {
    strategies: &'static [S],
}

impl<S: ReadStrategy> MetricSource<S> {
    pub const fn new(strategies: &'static [S]) -> Self {
        Self { strategies }
    }

    /// Strategies in the order they are tried
    pub fn strategies(&self) -> &'static [S] {
        self.strategies
    }

    /// Try each strategy in order, returning the first value obtained
    /// together with the strategy that produced it
    pub fn read_first(&self, root: &SysRoot) -> Option<(S, S::Value)> {
        for strategy in self.strategies() {
            match strategy.read(root) {
                Ok(value) => return Some((*strategy, value)),
                Err(e) => debug!("{:?} unavailable: {}", strategy, e),
            }
        }
        None
    }
}

/// Parse the whitespace-separated token at `index`
pub fn field<T: std::str::FromStr>(
    tokens: &[&str],
    index: usize,
    path: &Path,
    name: &'static str,
) -> Result<T, SourceError> {
    tokens
        .get(index)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SourceError::parse(path, name))
}

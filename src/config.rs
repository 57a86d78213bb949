//! Runtime settings shared by the collectors, scheduler and probe.

use crate::probe::ProbeConfig;
use crate::scheduler::DEFAULT_PERIOD;
use anyhow::{ensure, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Sampling period of the collectors
    pub interval: Duration,
    /// Prefix for every /proc and /sys path
    pub root: PathBuf,
    /// Volume whose utilization is reported
    pub data_volume: PathBuf,
    /// Limit on the thermal shell fallback
    pub thermal_shell_timeout: Duration,
    /// Ping probe settings; `None` disables the probe
    pub probe: Option<ProbeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PERIOD,
            root: PathBuf::from("/"),
            data_volume: PathBuf::from("/"),
            thermal_shell_timeout: Duration::from_millis(500),
            probe: Some(ProbeConfig::default()),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.interval.is_zero(), "sampling interval must be greater than zero");
        ensure!(
            !self.thermal_shell_timeout.is_zero(),
            "thermal shell timeout must be greater than zero"
        );
        if let Some(probe) = &self.probe {
            ensure!(!probe.interval.is_zero(), "probe interval must be greater than zero");
            ensure!(!probe.timeout.is_zero(), "ping timeout must be greater than zero");
            ensure!(probe.count > 0, "ping count must be at least 1");
            ensure!(!probe.target.trim().is_empty(), "ping target must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.probe.unwrap().interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_rejected() {
        let config = Config {
            interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ping_count_rejected() {
        let config = Config {
            probe: Some(ProbeConfig {
                count: 0,
                ..ProbeConfig::default()
            }),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ping count"));
    }

    #[test]
    fn disabled_probe_skips_probe_checks() {
        let config = Config {
            probe: None,
            ..Config::default()
        };
        config.validate().unwrap();
    }
}

//! CPU temperature from thermal-zone, hwmon and vendor sensor files.

use super::source::{MetricSource, ReadStrategy, SourceError, SysRoot};
use log::debug;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// A single sensor file holding degrees or millidegrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalFile(pub &'static str);

/// Sensor files in priority order
pub const THERMAL_SOURCES: MetricSource<ThermalFile> = MetricSource::new(&[
    ThermalFile("sys/class/thermal/thermal_zone0/temp"),
    ThermalFile("sys/devices/virtual/thermal/thermal_zone0/temp"),
    ThermalFile("sys/class/hwmon/hwmon0/temp1_input"),
    ThermalFile("sys/class/hwmon/hwmon1/temp1_input"),
    ThermalFile("sys/devices/platform/coretemp.0/hwmon/hwmon0/temp1_input"),
    ThermalFile("sys/class/thermal/thermal_zone1/temp"),
    ThermalFile("sys/devices/system/cpu/cpu0/cpufreq/cpu_temp"),
    ThermalFile("sys/devices/system/cpu/cpu0/cpufreq/FakeShmoo_cpu_temp"),
    ThermalFile("sys/class/i2c-adapter/i2c-4/4-004c/temperature"),
    ThermalFile("sys/devices/platform/tegra-i2c.3/i2c-4/4-004c/temperature"),
    ThermalFile("sys/devices/platform/omap/omap_temp_sensor.0/temperature"),
    ThermalFile("sys/devices/platform/s5p-tmu/temperature"),
    ThermalFile("sys/kernel/debug/tegra_thermal/temp_tj"),
]);

/// Reads skipped after the shell fallback found nothing
pub const SHELL_RETRY_TICKS: u32 = 30;

/// `$0` is the system root, passed as an argument so it is never interpreted by the shell
const SHELL_GLOB: &str = "cat \"$0\"/sys/class/thermal/thermal_zone*/temp 2>/dev/null";

impl ReadStrategy for ThermalFile {
    type Value = f64;

    fn read(&self, root: &SysRoot) -> Result<f64, SourceError> {
        let content = root.read(self.0)?;
        let raw: f64 = content
            .trim()
            .parse()
            .map_err(|_| SourceError::parse(root.path(self.0), "temperature"))?;

        let celsius = normalize(raw);
        if is_plausible(celsius) {
            Ok(celsius)
        } else {
            Err(SourceError::Implausible {
                path: root.path(self.0),
                value: celsius,
            })
        }
    }
}

/// Readings above 1000 are millidegrees
pub fn normalize(raw: f64) -> f64 {
    if raw > 1000.0 {
        raw / 1000.0
    } else {
        raw
    }
}

pub fn is_plausible(celsius: f64) -> bool {
    celsius > 0.0 && celsius < 150.0
}

/// Reads the first plausible temperature, falling back to a shell glob.
///
/// A failed shell fallback is not retried for [`SHELL_RETRY_TICKS`] reads.
pub struct ThermalReader {
    root: SysRoot,
    shell_timeout: Duration,
    shell_skips: u32,
}

impl ThermalReader {
    pub fn new(root: SysRoot, shell_timeout: Duration) -> Self {
        Self {
            root,
            shell_timeout,
            shell_skips: 0,
        }
    }

    pub fn read(&mut self) -> Option<f64> {
        if let Some((source, celsius)) = THERMAL_SOURCES.read_first(&self.root) {
            debug!("temperature {:.1} from {}", celsius, source.0);
            return Some(celsius);
        }

        if self.shell_skips > 0 {
            self.shell_skips -= 1;
            return None;
        }

        match self.read_shell_glob() {
            Ok(celsius) => Some(celsius),
            Err(e) => {
                debug!("thermal shell fallback: {}", e);
                self.shell_skips = SHELL_RETRY_TICKS;
                None
            }
        }
    }

    fn read_shell_glob(&self) -> Result<f64, SourceError> {
        let output = run_bounded(
            Command::new("sh")
                .arg("-c")
                .arg(SHELL_GLOB)
                .arg(self.root.as_path()),
            self.shell_timeout,
        )?;

        output
            .lines()
            .filter_map(|line| line.trim().parse::<f64>().ok())
            .map(normalize)
            .find(|c| is_plausible(*c))
            .ok_or_else(|| SourceError::Process {
                program: "sh".to_string(),
                reason: "no plausible thermal zone reading".to_string(),
            })
    }
}

/// Run a short command, killing it if it outlives `timeout`
fn run_bounded(command: &mut Command, timeout: Duration) -> Result<String, SourceError> {
    const POLL: Duration = Duration::from_millis(10);
    let program = command.get_program().to_string_lossy().into_owned();
    let failed = |reason: String| SourceError::Process {
        program: program.clone(),
        reason,
    };

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| failed(e.to_string()))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Timeout {
                    program: program.clone(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL),
            Err(e) => return Err(failed(e.to_string())),
        }
    }

    let mut output = String::new();
    if let Some(stdout) = child.stdout.take() {
        stdout
            .take(64 * 1024)
            .read_to_string(&mut output)
            .map_err(|e| failed(e.to_string()))?;
    }
    Ok(output)
}

//! Background latency / packet-loss probe.
//!
//! A ping process is spawned every probe interval on its own task so the
//! sampling tick never waits on it. Results go into a [`ProbeCache`] that only
//! the probe task writes and only the network collector reads.

use crate::metrics::source::SourceError;
use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Ping settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Time between probe runs
    pub interval: Duration,
    /// Executable to run
    pub program: String,
    /// Address to ping
    pub target: String,
    /// Echo requests per run (`-c`)
    pub count: u32,
    /// Seconds to wait for each reply (`-W`)
    pub wait_secs: u32,
    /// Hard limit on one run, after which the process is killed
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            program: "ping".to_string(),
            target: "8.8.8.8".to_string(),
            count: 3,
            wait_secs: 1,
            timeout: Duration::from_secs(4),
        }
    }
}

impl ProbeConfig {
    pub fn args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.count.to_string(),
            "-W".to_string(),
            self.wait_secs.to_string(),
            self.target.clone(),
        ]
    }
}

/// Values parsed from one completed ping run; absent fields were not printed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReading {
    pub latency_ms: Option<String>,
    pub packet_loss: Option<String>,
}

/// Last known-good probe values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    pub latency_ms: Option<String>,
    pub packet_loss: Option<String>,
    pub captured_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    result: ProbeResult,
}

/// Single-writer, single-reader store for the latest [`ProbeResult`].
///
/// Every write carries the generation the writer started with. Invalidating
/// the cache bumps the generation, so a probe run that finishes after its
/// owner stopped cannot publish anything.
#[derive(Debug, Clone, Default)]
pub struct ProbeCache {
    inner: Arc<Mutex<CacheState>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn snapshot(&self) -> ProbeResult {
        self.lock().result.clone()
    }

    /// Merge a reading into the cache.
    ///
    /// Only fields present in the reading replace cached values. Returns
    /// `false` without writing when `generation` is stale.
    pub fn publish(&self, generation: u64, reading: ProbeReading) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        if reading.latency_ms.is_none() && reading.packet_loss.is_none() {
            return true;
        }
        if let Some(latency) = reading.latency_ms {
            state.result.latency_ms = Some(latency);
        }
        if let Some(loss) = reading.packet_loss {
            state.result.packet_loss = Some(loss);
        }
        state.result.captured_at = Some(Instant::now());
        true
    }

    /// Reject all writes started before this call
    pub fn invalidate(&self) {
        self.lock().generation += 1;
    }
}

/// Latency from the first `time=23.4 ms` token, without the unit
pub fn parse_latency(output: &str) -> Option<String> {
    let start = output.find("time=")? + "time=".len();
    let value: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    (!value.is_empty()).then_some(value)
}

/// The percentage token right before `packet loss`, e.g. `0%` or `33.3333%`
pub fn parse_packet_loss(output: &str) -> Option<String> {
    let line = output.lines().find(|line| line.contains("packet loss"))?;
    let before = &line[..line.find("packet loss")?];
    before
        .split_whitespace()
        .last()
        .filter(|token| token.ends_with('%'))
        .map(str::to_string)
}

pub fn parse_ping_output(output: &str) -> ProbeReading {
    ProbeReading {
        latency_ms: parse_latency(output),
        packet_loss: parse_packet_loss(output),
    }
}

/// Run a command and collect stdout, killing it after `timeout`.
///
/// A non-zero exit is not an error: ping exits with 1 when every request
/// was lost but still prints its summary.
pub async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, SourceError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SourceError::Process {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    match time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Ok(Err(e)) => Err(SourceError::Process {
            program: program.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(SourceError::Timeout {
            program: program.to_string(),
            timeout,
        }),
    }
}

/// One probe run
pub async fn probe_once(config: &ProbeConfig) -> Result<ProbeReading, SourceError> {
    let output = run_with_timeout(&config.program, &config.args(), config.timeout).await?;
    Ok(parse_ping_output(&output))
}

/// Running probe task
pub struct ProbeHandle {
    cache: ProbeCache,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ProbeHandle {
    /// Stop probing. Once this returns the cache no longer changes.
    pub async fn stop(mut self) {
        self.cache.invalidate();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("probe task ended abnormally: {}", e);
                }
            }
        }
        info!("latency probe stopped");
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cache.invalidate();
            task.abort();
        }
    }
}

/// Start probing in the background, publishing into `cache`
pub fn spawn(config: ProbeConfig, cache: ProbeCache) -> ProbeHandle {
    let (shutdown, mut stopped) = watch::channel(false);
    let generation = cache.generation();
    let writer = cache.clone();

    info!(
        "latency probe every {:?} against {}",
        config.interval, config.target
    );

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = stopped.changed() => break,
                outcome = probe_once(&config) => outcome,
            };

            match outcome {
                Ok(reading) => {
                    debug!("probe reading {:?}", reading);
                    if !writer.publish(generation, reading) {
                        break;
                    }
                }
                Err(e @ SourceError::Process { .. }) => warn!("probe run discarded: {}", e),
                Err(e) => debug!("probe run discarded: {}", e),
            }
        }
    });

    ProbeHandle {
        cache,
        shutdown,
        task: Some(task),
    }
}

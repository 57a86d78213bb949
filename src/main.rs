//! sysprobe - real-time disk, CPU and network telemetry.
//!
//! Samples the three collectors on a fixed period, keeps a background ping
//! probe for latency and packet loss, and shows the readings in a TUI or as
//! plain/JSON lines on stdout.

mod config;
mod display;
mod metrics;
mod monitor;
mod probe;
mod scheduler;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use display::Readout;
use log::{info, LevelFilter};
use monitor::{with_panics_logged, Monitor, Snapshot};
use probe::ProbeConfig;
use ratatui::{prelude::CrosstermBackend, Terminal};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Real-time system telemetry for disk, CPU and network
#[derive(Parser, Debug)]
#[command(name = "sysprobe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sampling interval in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// Seconds between ping probe runs
    #[arg(long, default_value = "5")]
    probe_interval_secs: u64,

    /// Host the ping probe targets
    #[arg(long, default_value = "8.8.8.8")]
    ping_target: String,

    /// Echo requests per probe run
    #[arg(long, default_value = "3")]
    ping_count: u32,

    /// Per-reply wait passed to ping, in seconds
    #[arg(long, default_value = "1")]
    ping_wait_secs: u32,

    /// Hard limit on one probe run, in seconds
    #[arg(long, default_value = "4")]
    ping_timeout_secs: u64,

    /// Ping executable
    #[arg(long, default_value = "ping")]
    ping_program: String,

    /// Volume whose storage utilization is shown
    #[arg(long, default_value = "/")]
    data_volume: PathBuf,

    /// Prefix for /proc and /sys paths
    #[arg(long, default_value = "/")]
    root: PathBuf,

    /// Run for specified duration (seconds), then exit
    #[arg(short, long)]
    duration: Option<u64>,

    /// Disable TUI and print one line per sample
    #[arg(long)]
    no_tui: bool,

    /// Print each sample as JSON (implies --no-tui)
    #[arg(long)]
    json: bool,

    /// Write diagnostics to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not run the ping probe
    #[arg(long)]
    no_probe: bool,
}

impl Args {
    fn tui(&self) -> bool {
        !self.no_tui && !self.json
    }

    fn config(&self) -> Config {
        let probe = (!self.no_probe).then(|| ProbeConfig {
            interval: Duration::from_secs(self.probe_interval_secs),
            program: self.ping_program.clone(),
            target: self.ping_target.clone(),
            count: self.ping_count,
            wait_secs: self.ping_wait_secs,
            timeout: Duration::from_secs(self.ping_timeout_secs),
        });

        Config {
            interval: Duration::from_millis(self.interval_ms),
            root: self.root.clone(),
            data_volume: self.data_volume.clone(),
            probe,
            ..Config::default()
        }
    }
}

/// Diagnostics go to stderr in line mode; the TUI owns the terminal, so
/// there they are off unless a log file is given.
fn init_logging(args: &Args) -> Result<()> {
    let default_level = if args.tui() && args.log_file.is_none() {
        LevelFilter::Off
    } else {
        LevelFilter::Warn
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level).parse_default_env();

    if let Some(path) = &args.log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("failed to initialize logging")?;
    Ok(())
}

fn take_changed(snapshots: &mut watch::Receiver<Option<Snapshot>>) -> Option<Snapshot> {
    match snapshots.has_changed() {
        Ok(true) => snapshots.borrow_and_update().clone(),
        _ => None,
    }
}

fn run_tui(snapshots: watch::Receiver<Option<Snapshot>>, duration: Option<Duration>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = with_panics_logged(|| tui_loop(&mut terminal, snapshots, duration));

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut snapshots: watch::Receiver<Option<Snapshot>>,
    duration: Option<Duration>,
) -> Result<()> {
    let start_time = Instant::now();
    let redraw = Duration::from_millis(100);
    let mut readout = Readout::default();

    loop {
        if let Some(dur) = duration {
            if start_time.elapsed() >= dur {
                return Ok(());
            }
        }

        if let Some(snapshot) = take_changed(&mut snapshots) {
            readout.apply(snapshot);
        }

        terminal.draw(|f| display::render(f, &readout))?;

        if event::poll(redraw)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && key.code == KeyCode::Char('q') {
                    return Ok(());
                }
            }
        }
    }
}

async fn run_no_tui(
    mut snapshots: watch::Receiver<Option<Snapshot>>,
    duration: Option<Duration>,
    json: bool,
) -> Result<()> {
    let deadline = async {
        match duration {
            Some(dur) => tokio::time::sleep(dur).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut readout = Readout::default();

    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        let Some(snapshot) = snapshots.borrow_and_update().clone() else {
            continue;
        };

        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            let time = snapshot.taken_at.format("%H:%M:%S").to_string();
            readout.apply(snapshot);
            println!("[{}] {}", time, readout.summary_line());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = args.config();
    config.validate()?;
    let duration = args.duration.map(Duration::from_secs);

    let handle = Monitor::start(&config);
    info!("monitoring {} (data volume {})", config.root.display(), config.data_volume.display());

    let result = if args.tui() {
        run_tui(handle.snapshots(), duration)
    } else {
        run_no_tui(handle.snapshots(), duration, args.json).await
    };

    handle.stop().await;
    result
}

//! Display strings and the terminal UI.

use crate::monitor::Snapshot;
use num_format::{Locale, ToFormattedString};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// Marker for a value no source could provide
pub const UNAVAILABLE: &str = "--";
/// Marker for a missing temperature
pub const TEMPERATURE_UNAVAILABLE: &str = "N/A";

pub fn format_disk_rate(rate: Option<(f64, f64)>) -> String {
    match rate {
        Some((read, write)) => format!("R: {:.2} MB/s  W: {:.2} MB/s", read, write),
        None => UNAVAILABLE.to_string(),
    }
}

pub fn format_percent(value: Option<u8>) -> String {
    match value {
        Some(pct) => format!("{}%", pct),
        None => UNAVAILABLE.to_string(),
    }
}

pub fn format_temperature(celsius: Option<f64>) -> String {
    match celsius {
        Some(t) => format!("{:.1}°C", t),
        None => TEMPERATURE_UNAVAILABLE.to_string(),
    }
}

pub fn format_count(value: Option<u32>) -> String {
    match value {
        Some(n) => n.to_formatted_string(&Locale::en),
        None => UNAVAILABLE.to_string(),
    }
}

pub fn format_bandwidth(rate: Option<(f64, f64)>) -> String {
    match rate {
        Some((down, up)) => format!("↓ {:.1} KB/s  ↑ {:.1} KB/s", down, up),
        None => UNAVAILABLE.to_string(),
    }
}

pub fn format_latency(latency_ms: &str) -> String {
    if latency_ms == UNAVAILABLE || latency_ms.is_empty() {
        UNAVAILABLE.to_string()
    } else {
        format!("{} ms", latency_ms)
    }
}

pub fn format_packet_loss(packet_loss: &str) -> String {
    if packet_loss.is_empty() {
        UNAVAILABLE.to_string()
    } else {
        packet_loss.to_string()
    }
}

/// Display-side view of the latest snapshot.
///
/// A shown rate stays on screen through baseline ticks (source switch,
/// counter reset) and is cleared once no source is readable at all.
#[derive(Debug, Default)]
pub struct Readout {
    latest: Option<Snapshot>,
    disk_rate: Option<(f64, f64)>,
    bandwidth: Option<(f64, f64)>,
}

impl Readout {
    pub fn apply(&mut self, snapshot: Snapshot) {
        if snapshot.disk.read_write_rate.is_some() || !snapshot.disk.rate_source_available {
            self.disk_rate = snapshot.disk.read_write_rate;
        }
        if snapshot.network.bandwidth.is_some() || !snapshot.network.bandwidth_source_available {
            self.bandwidth = snapshot.network.bandwidth;
        }
        self.latest = Some(snapshot);
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub fn disk_lines(&self) -> Vec<(&'static str, String)> {
        let utilization = self.latest.as_ref().and_then(|s| s.disk.utilization_percent);
        vec![
            ("Throughput", format_disk_rate(self.disk_rate)),
            ("Storage", format_percent(utilization)),
        ]
    }

    pub fn cpu_lines(&self) -> Vec<(&'static str, String)> {
        let cpu = self.latest.as_ref().map(|s| s.cpu.clone()).unwrap_or_default();
        vec![
            ("Usage", format_percent(cpu.usage_percent)),
            ("Temperature", format_temperature(cpu.temperature_celsius)),
            ("Memory", format_percent(cpu.memory_percent)),
            ("Threads", format_count(cpu.thread_count)),
            ("Handles", format_count(cpu.handle_count)),
        ]
    }

    pub fn network_lines(&self) -> Vec<(&'static str, String)> {
        let (connections, latency, loss) = match &self.latest {
            Some(s) => (
                Some(s.network.active_connections),
                format_latency(&s.network.latency_ms),
                format_packet_loss(&s.network.packet_loss),
            ),
            None => (None, UNAVAILABLE.to_string(), UNAVAILABLE.to_string()),
        };
        vec![
            ("Bandwidth", format_bandwidth(self.bandwidth)),
            ("Connections", format_count(connections)),
            ("Latency", latency),
            ("Packet loss", loss),
        ]
    }

    /// Single-line summary for non-TUI output
    pub fn summary_line(&self) -> String {
        self.disk_lines()
            .into_iter()
            .chain(self.cpu_lines())
            .chain(self.network_lines())
            .map(|(label, value)| format!("{}: {}", label, value))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

fn value_style(value: &str) -> Style {
    if value == UNAVAILABLE || value == TEMPERATURE_UNAVAILABLE {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    }
}

/// Render one titled panel of `label: value` rows
fn render_panel(f: &mut Frame, area: Rect, title: &str, color: Color, rows: Vec<(&'static str, String)>) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines: Vec<Line> = rows
        .into_iter()
        .map(|(label, value)| {
            let style = value_style(&value);
            Line::from(vec![
                Span::styled(format!("{:<12}", label), Style::default().fg(color)),
                Span::styled(value, style),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

/// Draw the whole screen
pub fn render(f: &mut Frame, readout: &Readout) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(8),    // Panels
            Constraint::Length(1), // Help bar
        ])
        .split(f.area());

    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(35),
            Constraint::Percentage(35),
        ])
        .split(main_chunks[0]);

    render_panel(f, panels[0], "Disk", Color::Yellow, readout.disk_lines());
    render_panel(f, panels[1], "CPU", Color::Cyan, readout.cpu_lines());
    render_panel(f, panels[2], "Network", Color::Blue, readout.network_lines());

    let updated = readout
        .latest()
        .map(|s| s.taken_at.format("%H:%M:%S").to_string());
    render_help_bar(f, main_chunks[1], updated.as_deref());
}

/// Render help bar at the bottom
pub fn render_help_bar(f: &mut Frame, area: Rect, updated: Option<&str>) {
    let status = match updated {
        Some(time) => format!(" q: Quit | updated {} ", time),
        None => " q: Quit | waiting for first sample… ".to_string(),
    };
    let paragraph = Paragraph::new(status).style(Style::default().fg(Color::Black).bg(Color::Gray));
    f.render_widget(paragraph, area);
}

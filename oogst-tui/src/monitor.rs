use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use oogst_core::frontier::Frontier;
use oogst_core::progress::{ProgressSnapshot, format_duration, group_thousands};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

const MAX_HISTORY: usize = 500;
const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    /// Span counted as "recent".
    pub window: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            window: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Error,
}

/// Dashboard state: the latest frontier poll plus a short history.
pub struct ProgressMonitor {
    options: MonitorOptions,
    history: VecDeque<ProgressSnapshot>,
    logs: Vec<(LogLevel, String)>,
}

impl ProgressMonitor {
    pub fn new(options: MonitorOptions) -> Self {
        Self {
            options,
            history: VecDeque::new(),
            logs: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&ProgressSnapshot> {
        self.history.back()
    }

    pub fn is_complete(&self) -> bool {
        self.latest().is_some_and(ProgressSnapshot::is_complete)
    }

    pub fn poll(&mut self, frontier: &Frontier) {
        match frontier.stats(self.options.window) {
            Ok(stats) => self.record(ProgressSnapshot::new(stats, self.options.window)),
            Err(e) => self.log(LogLevel::Error, format!("Error getting stats: {}", e)),
        }
    }

    pub fn record(&mut self, snapshot: ProgressSnapshot) {
        if snapshot.is_complete() {
            self.log(LogLevel::Info, "All URLs processed!".to_string());
        }
        self.history.push_back(snapshot);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push((level, message));
        if self.logs.len() > MAX_LOGS {
            self.logs.drain(0..self.logs.len() - MAX_LOGS);
        }
    }

    pub fn render(&self, f: &mut Frame) {
        let vertical_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Gauge
                Constraint::Length(8), // Counters
                Constraint::Min(5),    // History + log
                Constraint::Length(1), // Hints bar
            ])
            .split(f.area());

        let lower_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(vertical_chunks[2]);

        self.render_gauge(f, vertical_chunks[0]);
        self.render_counters(f, vertical_chunks[1]);
        self.render_history(f, lower_chunks[0]);
        self.render_logs(f, lower_chunks[1]);
        self.render_hints(f, vertical_chunks[3]);
    }

    fn render_gauge(&self, f: &mut Frame, area: Rect) {
        let percent = self.latest().map(ProgressSnapshot::percent).unwrap_or(0.0);
        let color = if self.is_complete() { Color::Green } else { Color::Yellow };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(" Progress "))
            .gauge_style(Style::default().fg(color))
            .ratio((percent / 100.0).clamp(0.0, 1.0))
            .label(format!("{:.1}%", percent));
        f.render_widget(gauge, area);
    }

    fn render_counters(&self, f: &mut Frame, area: Rect) {
        let (title, border_color) = if self.is_complete() {
            (" Complete ", Color::Green)
        } else {
            (" Frontier ", Color::Cyan)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(border_color));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let Some(snapshot) = self.latest() else {
            let waiting = Paragraph::new("Waiting for first poll...")
                .style(Style::default().fg(Color::DarkGray));
            f.render_widget(waiting, inner);
            return;
        };

        let label = Style::default().fg(Color::DarkGray);
        let value = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
        let stats = &snapshot.stats;
        let eta = snapshot
            .eta()
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());

        let text = vec![
            Line::from(vec![
                Span::styled("Total:      ", label),
                Span::styled(group_thousands(stats.total), value),
            ]),
            Line::from(vec![
                Span::styled("Processed:  ", label),
                Span::styled(group_thousands(stats.processed), value),
            ]),
            Line::from(vec![
                Span::styled("Remaining:  ", label),
                Span::styled(group_thousands(stats.unprocessed), value),
            ]),
            Line::from(vec![
                Span::styled(
                    format!("Last {}: ", format_duration(self.options.window)),
                    label,
                ),
                Span::styled(stats.recently_processed.to_string(), value),
                Span::styled("   ETA: ", label),
                Span::styled(eta, Style::default().fg(Color::Cyan)),
            ]),
            Line::from(vec![
                Span::styled("Updated:    ", label),
                Span::raw(snapshot.taken_at.format("%H:%M:%S").to_string()),
            ]),
        ];

        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
    }

    fn render_history(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" History ({}) ", self.history.len()))
            .border_style(Style::default().fg(Color::Cyan));
        let inner = block.inner(area);
        f.render_widget(block, area);

        // newest at the bottom
        let height = inner.height as usize;
        let items: Vec<ListItem> = self
            .history
            .iter()
            .skip(self.history.len().saturating_sub(height))
            .map(|snapshot| ListItem::new(snapshot.render_line()))
            .collect();
        f.render_widget(List::new(items), inner);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Logs ")
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let items: Vec<ListItem> = self
            .logs
            .iter()
            .skip(self.logs.len().saturating_sub(height))
            .map(|(level, message)| {
                let (prefix, style) = match level {
                    LogLevel::Info => ("INFO ", Style::default().fg(Color::Blue)),
                    LogLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(format!("[{}] {}", prefix, message)).style(style)
            })
            .collect();
        f.render_widget(List::new(items), inner);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let hints = Line::from(vec![
            Span::styled(" q/ESC ", key),
            Span::raw(" Exit  "),
            Span::styled(" r ", key),
            Span::raw(" Refresh now  "),
            Span::raw(format!(
                "polling every {}",
                format_duration(self.options.poll_interval)
            )),
        ]);
        let paragraph = Paragraph::new(hints).style(Style::default().bg(Color::Black).fg(Color::Gray));
        f.render_widget(paragraph, area);
    }
}

/// Run the progress dashboard (blocking, run it off the async runtime).
///
/// Returns the last snapshot once nothing is left to process, or when the
/// user quits or `should_exit` is set.
pub fn run_monitor(
    frontier: Arc<Frontier>,
    options: MonitorOptions,
    should_exit: Arc<AtomicBool>,
) -> Result<Option<ProgressSnapshot>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut monitor = ProgressMonitor::new(options);
    let mut last_poll: Option<Instant> = None;

    let outcome = loop {
        if last_poll.is_none_or(|at| at.elapsed() >= options.poll_interval) {
            monitor.poll(&frontier);
            last_poll = Some(Instant::now());
        }

        if let Err(e) = terminal.draw(|f| monitor.render(f)) {
            break Err(e.into());
        }

        if monitor.is_complete() || should_exit.load(Ordering::Relaxed) {
            break Ok(());
        }

        match event::poll(Duration::from_millis(200)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => break Err(e.into()),
        }
        if let Ok(Event::Key(key)) = event::read()
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break Ok(()),
                KeyCode::Char('q') | KeyCode::Esc => break Ok(()),
                KeyCode::Char('r') => last_poll = None,
                _ => {}
            }
        }
    };

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    outcome.map(|()| monitor.latest().cloned())
}

/// Print one progress line per poll until nothing is left to process.
pub async fn run_plain_monitor<W: Write>(
    frontier: Arc<Frontier>,
    options: MonitorOptions,
    should_exit: Arc<AtomicBool>,
    out: &mut W,
) -> Result<Option<ProgressSnapshot>> {
    let mut last = None;

    while !should_exit.load(Ordering::Relaxed) {
        match frontier.stats(options.window) {
            Ok(stats) => {
                let snapshot = ProgressSnapshot::new(stats, options.window);
                writeln!(out, "{}", snapshot.render_line())?;
                let complete = snapshot.is_complete();
                last = Some(snapshot);
                if complete {
                    writeln!(out, "\nAll URLs processed!")?;
                    break;
                }
            }
            Err(e) => writeln!(out, "Error getting stats: {}", e)?,
        }
        out.flush()?;
        sleep_unless_exit(options.poll_interval, &should_exit).await;
    }

    Ok(last)
}

async fn sleep_unless_exit(duration: Duration, should_exit: &AtomicBool) {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + duration;
    while !should_exit.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(step.min(deadline - now)).await;
    }
}

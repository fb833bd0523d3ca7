//! Terminal dashboard.
//!
//! Renders the session state, microphone activity, uplink counters,
//! synthetic system metrics, and the event log console. Keys: `S`
//! initializes the session, `D` terminates it, `M` toggles the metrics
//! detail view, `Q` quits.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use percept_foundation::SessionState;
use percept_telemetry::LogLevel;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
    Frame, Terminal,
};

use crate::session::SessionController;

const VOLUME_HISTORY_LEN: usize = 60;

struct DashboardState {
    controller: Arc<SessionController>,
    volume_history: VecDeque<u64>,
    show_details: bool,
}

impl DashboardState {
    fn new(controller: Arc<SessionController>) -> Self {
        let mut volume_history = VecDeque::with_capacity(VOLUME_HISTORY_LEN);
        for _ in 0..VOLUME_HISTORY_LEN {
            volume_history.push_back(0);
        }
        Self {
            controller,
            volume_history,
            show_details: true,
        }
    }

    fn record_volume(&mut self) {
        let percent = self.controller.metrics().mic_volume_percent().round() as u64;
        self.volume_history.pop_front();
        self.volume_history.push_back(percent.min(100));
    }
}

pub async fn run(controller: Arc<SessionController>) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = DashboardState::new(controller);
    let res = run_loop(&mut terminal, &mut state).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut DashboardState,
) -> io::Result<()> {
    let mut ui_update_interval = tokio::time::interval(Duration::from_millis(50));

    loop {
        terminal.draw(|f| draw_ui(f, state))?;

        tokio::select! {
            Some(event) = async {
                if event::poll(Duration::from_millis(10)).unwrap_or(false) {
                    event::read().ok()
                } else {
                    None
                }
            } => {
                if let Event::Key(key) = event {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => {
                            state.controller.disconnect().await;
                            return Ok(());
                        }
                        KeyCode::Char('s') | KeyCode::Char('S') => {
                            // Failures land in the event log console.
                            let controller = Arc::clone(&state.controller);
                            tokio::spawn(async move {
                                let _ = controller.connect().await;
                            });
                        }
                        KeyCode::Char('d') | KeyCode::Char('D') => {
                            let controller = Arc::clone(&state.controller);
                            tokio::spawn(async move {
                                controller.disconnect().await;
                            });
                        }
                        KeyCode::Char('m') | KeyCode::Char('M') => {
                            state.show_details = !state.show_details;
                        }
                        _ => {}
                    }
                }
            }

            _ = ui_update_interval.tick() => {
                state.record_volume();
            }
        }
    }
}

fn draw_ui(f: &mut Frame, state: &DashboardState) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(8),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], state);

    let audio_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(main_chunks[1]);

    draw_audio_activity(f, audio_chunks[0], state);
    draw_uplink(f, audio_chunks[1], state);

    let middle_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(main_chunks[2]);

    draw_system_metrics(f, middle_chunks[0], state);
    draw_logs(f, middle_chunks[1], state);

    draw_footer(f, main_chunks[3], state);
}

fn state_badge(session_state: SessionState) -> Span<'static> {
    match session_state {
        SessionState::Running => Span::styled(
            "RUNNING",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        SessionState::Initializing => {
            Span::styled("INITIALIZING", Style::default().fg(Color::Yellow))
        }
        SessionState::Error => Span::styled(
            "ERROR",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        SessionState::Idle => Span::styled("IDLE", Style::default().fg(Color::Gray)),
    }
}

fn draw_header(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default().borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = vec![
        Line::from(vec![
            Span::styled(
                "VISION AI",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  Interactive Perception System  "),
            state_badge(state.controller.state()),
        ]),
        Line::from(Span::styled(
            "[S] Initialize  [D] Terminate  [M] Details  [Q] Quit",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    f.render_widget(Paragraph::new(lines), inner);
}

fn draw_audio_activity(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default()
        .title("Audio Activity")
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Min(3),
        ])
        .split(inner);

    let metrics = state.controller.metrics();
    let level_percent = metrics.mic_volume_percent().clamp(0.0, 100.0) as u16;

    let gauge = Gauge::default()
        .block(Block::default().title("Mic"))
        .gauge_style(if level_percent > 80 {
            Style::default().fg(Color::Red)
        } else if level_percent > 60 {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Green)
        })
        .percent(level_percent)
        .label(format!("{level_percent}%"));
    f.render_widget(gauge, chunks[0]);

    let (status_text, status_color) = match state.controller.state() {
        SessionState::Running if metrics.speaking() => ("SPEAKING...", Color::Green),
        SessionState::Running => ("LISTENING", Color::White),
        _ => ("OFFLINE", Color::DarkGray),
    };
    let status = Paragraph::new(Span::styled(
        status_text,
        Style::default()
            .fg(status_color)
            .add_modifier(Modifier::BOLD),
    ))
    .alignment(Alignment::Center);
    f.render_widget(status, chunks[1]);

    let sparkline_data: Vec<u64> = state.volume_history.iter().copied().collect();
    let sparkline = Sparkline::default()
        .block(Block::default().title("History (60 samples)"))
        .data(&sparkline_data)
        .style(Style::default().fg(Color::Cyan))
        .max(100);
    f.render_widget(sparkline, chunks[2]);
}

fn draw_uplink(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default().title("Uplink").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let m = state.controller.metrics();
    let lines = vec![
        Line::from(format!(
            "Audio frames sent: {}",
            m.audio_frames_sent.load(Ordering::Relaxed)
        )),
        Line::from(format!(
            "Video frames sent: {}",
            m.video_frames_sent.load(Ordering::Relaxed)
        )),
        Line::from(format!(
            "Send failures: {}",
            m.send_failures.load(Ordering::Relaxed)
        )),
        Line::from(format!(
            "Capture dropped: {}",
            m.audio_frames_dropped.load(Ordering::Relaxed)
        )),
        Line::from(format!(
            "Capture FPS: {:.1}",
            m.capture_fps.load(Ordering::Relaxed) as f64 / 10.0
        )),
        Line::from(format!(
            "Playback units: {}",
            m.playback_units_active.load(Ordering::Relaxed)
        )),
    ];
    f.render_widget(Paragraph::new(lines), inner);
}

fn draw_system_metrics(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default()
        .title("System Metrics")
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let latest = state.controller.latest_stats();
    let mut lines = vec![
        Line::from(format!("CPU:        {:5.1} %", latest.cpu_usage)),
        Line::from(format!("Memory:     {:5.1} MB", latest.memory_mb)),
        Line::from(format!("Latency:    {:5.1} ms", latest.latency_ms)),
        Line::from(format!("FPS:        {:5.1}", latest.fps)),
        Line::from(format!("Confidence: {:5.2}", latest.confidence)),
    ];

    if !state.show_details {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "[M] show details",
            Style::default().fg(Color::DarkGray),
        )));
        f.render_widget(Paragraph::new(lines), inner);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(3)])
        .split(inner);
    f.render_widget(Paragraph::new(lines), chunks[0]);

    let cpu_data: Vec<u64> = state
        .controller
        .stats_window()
        .iter()
        .map(|sample| sample.cpu_usage.round() as u64)
        .collect();
    let sparkline = Sparkline::default()
        .block(Block::default().title("CPU history"))
        .data(&cpu_data)
        .style(Style::default().fg(Color::Magenta))
        .max(100);
    f.render_widget(sparkline, chunks[1]);
}

fn draw_logs(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default()
        .title("Execution Logs")
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let entries = state.controller.log().snapshot();
    let log_lines: Vec<Line> = entries
        .iter()
        .rev()
        .take(inner.height as usize)
        .rev()
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => Color::Blue,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
                LogLevel::System => Color::Green,
            };
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", entry.time_str()),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(format!("{:6} ", entry.level), Style::default().fg(color)),
                Span::styled(
                    format!("[{}] ", entry.subsystem),
                    Style::default().fg(Color::Blue),
                ),
                Span::raw(entry.message.clone()),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(log_lines), inner);
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default().borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = vec![
        Line::from(format!(
            "ARCH: RUST-TOKIO-CPAL | MODEL: {}",
            state.controller.model()
        )),
        Line::from("MODULES: AUDIO_IN, VIDEO_IN, TTS, LLM"),
    ];
    f.render_widget(
        Paragraph::new(lines).style(Style::default().fg(Color::DarkGray)),
        inner,
    );
}

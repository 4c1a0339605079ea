use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, Paragraph};
use ratatui::Terminal;
use watcher_core::{
    Dashboard, DashboardView, MediaSessionState, PolledState, RenderTarget, StreamStatus,
    SystemHealth,
};

use crate::render;

const FRAME_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Cpu,
    Ram,
    Gpu,
    Disk,
    Fps,
}

const METRICS: [(Metric, &str, Color); 5] = [
    (Metric::Cpu, "CPU (%)", Color::Yellow),
    (Metric::Ram, "RAM (%)", Color::Cyan),
    (Metric::Gpu, "GPU (%)", Color::Green),
    (Metric::Disk, "Disk (%)", Color::Magenta),
    (Metric::Fps, "Stream (fps)", Color::Blue),
];

struct MetricSeries {
    label: &'static str,
    color: Color,
    points: VecDeque<(f64, f64)>,
}

impl MetricSeries {
    fn new(label: &'static str, color: Color) -> Self {
        Self {
            label,
            color,
            points: VecDeque::new(),
        }
    }

    fn push(&mut self, x: f64, y: f64, window_sec: f64) {
        self.points.push_back((x, y));
        while let Some((old_x, _)) = self.points.front() {
            if x - old_x > window_sec {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    fn bounds(&self) -> [f64; 2] {
        if self.points.is_empty() {
            return [0.0, 1.0];
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for (_, y) in &self.points {
            min = min.min(*y);
            max = max.max(*y);
        }
        if (max - min).abs() < f64::EPSILON {
            [min - 1.0, max + 1.0]
        } else {
            let pad = (max - min) * 0.12;
            [min - pad, max + pad]
        }
    }
}

struct ViewerState {
    start: Instant,
    media: MediaSessionState,
    render: RenderTarget,
    channel_connected: bool,
    stream: PolledState<StreamStatus>,
    health: PolledState<SystemHealth>,
    last_event: Option<String>,
    series: Vec<MetricSeries>,
}

impl ViewerState {
    fn new() -> Self {
        let series = METRICS
            .iter()
            .map(|(_, label, color)| MetricSeries::new(label, *color))
            .collect();

        Self {
            start: Instant::now(),
            media: MediaSessionState::Negotiating,
            render: RenderTarget::None,
            channel_connected: false,
            stream: PolledState::default(),
            health: PolledState::default(),
            last_event: None,
            series,
        }
    }

    fn sample(&mut self, metric: Metric, value: Option<f64>, window_sec: f64) {
        let Some(value) = value else {
            return;
        };
        let t = self.start.elapsed().as_secs_f64();
        if let Some(idx) = METRICS.iter().position(|(m, _, _)| *m == metric) {
            self.series[idx].push(t, value, window_sec);
        }
    }

    /// Pulls whatever changed since the last frame out of the dashboard.
    fn update(&mut self, view: &mut DashboardView, window_sec: f64) {
        self.media = *view.media.borrow();
        self.render = view.render.borrow().clone();
        self.channel_connected = *view.channel_connected.borrow();

        if view.stream_status.has_changed().unwrap_or(false) {
            self.stream = view.stream_status.borrow_and_update().clone();
            let fps = self.stream.snapshot.as_ref().map(|s| s.fps);
            self.sample(Metric::Fps, fps, window_sec);
        }

        if view.system_health.has_changed().unwrap_or(false) {
            self.health = view.system_health.borrow_and_update().clone();
            if let Some(health) = self.health.snapshot.clone() {
                self.sample(Metric::Cpu, health.cpu_percent, window_sec);
                self.sample(Metric::Ram, health.ram_percent, window_sec);
                self.sample(Metric::Gpu, health.gpu_percent, window_sec);
                self.sample(Metric::Disk, health.disk_percent, window_sec);
            }
        }

        if view.last_event.has_changed().unwrap_or(false) {
            self.last_event = view
                .last_event
                .borrow_and_update()
                .as_ref()
                .map(render::inbound_event);
        }
    }
}

pub async fn run_viewer(dashboard: &Dashboard, window_sec: f64) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut view = dashboard.view();
    let mut state = ViewerState::new();

    let run_result = async {
        loop {
            // Non-blocking poll; the core tasks share this thread.
            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok::<(), anyhow::Error>(()),
                        KeyCode::Char('r') => dashboard.refresh(),
                        _ => {}
                    }
                }
            }

            state.update(&mut view, window_sec);
            terminal.draw(|frame| draw_ui(frame.size(), frame, &state, window_sec))?;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                _ = tokio::time::sleep(FRAME_INTERVAL) => {}
            }
        }
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, state: &ViewerState, window_sec: f64) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)])
        .split(area);

    frame.render_widget(render_header(state, window_sec), rows[0]);

    let chart_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(rows[1]);

    let now = state.start.elapsed().as_secs_f64();
    let mut idx = 0;
    for row_area in chart_rows.iter().copied() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(row_area);

        for col in cols.iter().copied() {
            match state.series.get(idx) {
                Some(series) => render_metric_chart(frame, col, series, now, window_sec),
                None => frame.render_widget(Paragraph::new(Line::from(" ")), col),
            }
            idx += 1;
        }
    }
}

fn media_color(state: MediaSessionState) -> Color {
    match state {
        MediaSessionState::Negotiating => Color::Yellow,
        MediaSessionState::LiveNegotiated => Color::Green,
        MediaSessionState::LiveDegraded => Color::LightYellow,
        MediaSessionState::Disconnected => Color::Red,
    }
}

fn render_header(state: &ViewerState, window_sec: f64) -> Paragraph<'static> {
    let badge = Style::default()
        .fg(Color::Black)
        .bg(media_color(state.media))
        .add_modifier(Modifier::BOLD);
    let channel_color = if state.channel_connected {
        Color::Green
    } else {
        Color::Red
    };
    let frame_info = match &state.render {
        RenderTarget::None => "no frame".to_string(),
        RenderTarget::RemoteTrack { kind, id } => format!("track {kind}/{id}"),
        RenderTarget::MjpegFrame { sequence, jpeg } => {
            format!("jpeg #{sequence} ({} bytes)", jpeg.len())
        }
    };

    let lines = vec![
        Line::from(vec![
            Span::styled(
                "Watcher  ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!(" {} ", state.media.label()), badge),
            Span::raw(format!("  {frame_info}  events: ")),
            Span::styled(
                render::channel_indicator(state.channel_connected),
                Style::default().fg(channel_color),
            ),
        ]),
        Line::from(render::polled_stream_status(&state.stream)),
        Line::from(render::polled_system_health(&state.health)),
        Line::from(format!(
            "{}  window={}s  ('r' refresh, 'q' quit)",
            state.last_event.as_deref().unwrap_or("Event:      (none)"),
            window_sec as u64
        )),
    ];

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn render_metric_chart(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    series: &MetricSeries,
    now_sec: f64,
    window_sec: f64,
) {
    let points: Vec<(f64, f64)> = series.points.iter().copied().collect();

    let x_min = (now_sec - window_sec).max(0.0);
    let x_max = now_sec.max(window_sec);
    let y_bounds = series.bounds();

    let dataset = Dataset::default()
        .name(series.label)
        .marker(symbols::Marker::Braille)
        .graph_type(ratatui::widgets::GraphType::Line)
        .style(Style::default().fg(series.color))
        .data(&points);

    let x_mid = (x_min + x_max) / 2.0;

    let chart = Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title(series.label))
        .x_axis(
            Axis::default()
                .title("time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(vec![
                    Span::raw(format!("{x_min:.0}")),
                    Span::raw(format!("{x_mid:.0}")),
                    Span::raw(format!("{x_max:.0}")),
                ]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y_bounds)
                .labels(vec![
                    Span::raw(format!("{:.1}", y_bounds[0])),
                    Span::raw(format!("{:.1}", (y_bounds[0] + y_bounds[1]) / 2.0)),
                    Span::raw(format!("{:.1}", y_bounds[1])),
                ]),
        );

    frame.render_widget(chart, area);
}

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use notify_rust::{Notification, Urgency};
use ratatui::{prelude::*, widgets::*};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

// ============================================================================
// Type Aliases & Constants
// ============================================================================

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
const POLL_RATE: Duration = Duration::from_millis(50);
const TICK_INTERVAL: Duration = Duration::from_secs(1);
const ALERT_PULSES: u32 = 5;
const ALERT_PULSE_GAP: Duration = Duration::from_millis(350);
const MAX_INPUT_LEN: usize = 9;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Clone)]
#[command(author, version, about = "⏳ studytimer - A Terminal Countdown Timer for Study Sessions")]
struct Args {
    /// Session length as MM, MM:SS or HH:MM:SS (prefills the duration field)
    duration: Option<String>,
    #[arg(short = 't', long)]
    theme: Option<String>,
    #[arg(long)]
    no_sound: bool,
    /// Start counting down immediately
    #[arg(long)]
    autostart: bool,
}

// ============================================================================
// Duration Parsing & Formatting
// ============================================================================

/// Parses `MM`, `MM:SS` or `HH:MM:SS` text into seconds. Anything else,
/// including a negative total, comes back as 0 and is rejected by `start`.
fn parse_duration_seconds(text: &str) -> u64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let seg = |s: &str| s.trim().parse::<i64>().ok();
    let parts: Vec<&str> = text.split(':').collect();

    let total = match parts.as_slice() {
        [m] => seg(m).map(|m| m * 60),
        [m, s] => match (seg(m), seg(s)) {
            (Some(m), Some(s)) => Some(m * 60 + s),
            _ => None,
        },
        [h, m, s] => match (seg(h), seg(m), seg(s)) {
            (Some(h), Some(m), Some(s)) => Some(h * 3600 + m * 60 + s),
            _ => None,
        },
        _ => None,
    };

    total.map_or(0, |t| t.max(0) as u64)
}

fn format_seconds(total: u64) -> String {
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

// ============================================================================
// Data Models
// ============================================================================

#[derive(Serialize, Deserialize, Clone)]
struct Config {
    duration: String,
    theme: String,
    sound_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            duration: "25:00".into(),
            theme: "default".into(),
            sound_enabled: true,
        }
    }
}

#[derive(Clone, Copy)]
struct Theme {
    readout: Color,
    progress: Color,
    border: Color,
    accent: Color,
    warning: Color,
    success: Color,
}

#[derive(PartialEq, Clone, Copy)]
enum View {
    Timer,
    Help,
}

// ============================================================================
// Timer Controller
// ============================================================================

#[derive(Debug, PartialEq, Clone, Copy)]
enum TimerState {
    Idle,
    Running,
    Paused,
    Finished,
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum StartOutcome {
    Started,
    Resumed,
    Ignored,
    Rejected,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct ButtonStates {
    start: bool,
    pause: bool,
    reset: bool,
}

/// Owns the countdown bookkeeping: the fixed session length, the seconds
/// left, and whether a tick is currently scheduled. All transitions go
/// through `start`/`pause`/`reset`/`tick`; the view reads the observable
/// outputs (`time_text`, `progress_ratio`, `buttons`, `state`) every frame.
struct TimerController {
    total_seconds: u64,
    remaining_seconds: u64,
    running: bool,
}

impl TimerController {
    fn new() -> Self {
        Self {
            total_seconds: 0,
            remaining_seconds: 0,
            running: false,
        }
    }

    fn state(&self) -> TimerState {
        if self.running {
            TimerState::Running
        } else if self.total_seconds == 0 {
            TimerState::Idle
        } else if self.remaining_seconds == 0 {
            TimerState::Finished
        } else {
            TimerState::Paused
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    /// Begins a fresh session from the duration text, or resumes a paused
    /// one without re-parsing. Idempotent while already running.
    fn start(&mut self, input: &str) -> StartOutcome {
        if self.running {
            return StartOutcome::Ignored;
        }

        if self.remaining_seconds == 0 {
            let parsed = parse_duration_seconds(input);
            if parsed == 0 {
                return StartOutcome::Rejected;
            }
            self.total_seconds = parsed;
            self.remaining_seconds = parsed;
            self.running = true;
            StartOutcome::Started
        } else {
            self.running = true;
            StartOutcome::Resumed
        }
    }

    fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    fn reset(&mut self) {
        self.running = false;
        self.total_seconds = 0;
        self.remaining_seconds = 0;
    }

    /// Advances the countdown by one second. Returns true on the tick that
    /// completes the session, which can happen at most once per session.
    /// A stale tick arriving after pause or reset is a silent no-op.
    fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.running = false;
            return true;
        }
        false
    }

    fn time_text(&self) -> String {
        format_seconds(self.remaining_seconds)
    }

    fn elapsed_seconds(&self) -> u64 {
        self.total_seconds - self.remaining_seconds
    }

    fn progress_ratio(&self) -> f64 {
        if self.total_seconds == 0 {
            return 0.0;
        }
        self.elapsed_seconds() as f64 / self.total_seconds as f64
    }

    fn buttons(&self) -> ButtonStates {
        ButtonStates {
            start: !self.running,
            pause: self.running,
            reset: self.total_seconds > 0 || self.remaining_seconds > 0,
        }
    }
}

// ============================================================================
// Alert Device
// ============================================================================

/// One short audible notification. The completion burst is the only caller.
trait AlertDevice: Send + Sync {
    fn pulse(&self);
}

struct SoundPlayer {
    command: &'static str,
    file: &'static str,
}

impl AlertDevice for SoundPlayer {
    fn pulse(&self) {
        let _ = std::process::Command::new(self.command)
            .arg(self.file)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
    }
}

struct TerminalBell;

impl AlertDevice for TerminalBell {
    fn pulse(&self) {
        use std::io::Write;
        let mut out = io::stdout();
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}

/// Picks the first platform sound that exists on disk, falling back to the
/// terminal bell when none do.
fn detect_alert_device() -> Arc<dyn AlertDevice> {
    let candidates: &[(&str, &str)] = if cfg!(target_os = "macos") {
        &[
            ("afplay", "/System/Library/Sounds/Glass.aiff"),
            ("afplay", "/System/Library/Sounds/Ping.aiff"),
        ]
    } else {
        &[
            ("paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"),
            ("paplay", "/usr/share/sounds/freedesktop/stereo/bell.oga"),
            ("aplay", "/usr/share/sounds/alsa/Front_Center.wav"),
        ]
    };

    for &(command, file) in candidates {
        if Path::new(file).exists() {
            return Arc::new(SoundPlayer { command, file });
        }
    }
    Arc::new(TerminalBell)
}

/// Emits the completion pulses on a detached thread. The burst carries no
/// cancellation token, so a reset right after completion can still sound the
/// remaining pulses; they only emit sound.
fn alert_burst(device: Arc<dyn AlertDevice>) {
    std::thread::spawn(move || {
        for i in 0..ALERT_PULSES {
            if i > 0 {
                std::thread::sleep(ALERT_PULSE_GAP);
            }
            device.pulse();
        }
    });
}

// ============================================================================
// Application State
// ============================================================================

struct AppState {
    timer: TimerController,
    duration_input: String,
    warning: Option<String>,
    next_tick: Option<Instant>,
    banner_open: bool,
    current_view: View,
    theme: Theme,
    sound_enabled: bool,
    alert: Arc<dyn AlertDevice>,
    animation_frame: u8,
}

impl AppState {
    fn new(config: Config, alert: Arc<dyn AlertDevice>) -> Self {
        Self {
            timer: TimerController::new(),
            duration_input: config.duration,
            warning: None,
            next_tick: None,
            banner_open: false,
            current_view: View::Timer,
            theme: get_theme(&config.theme),
            sound_enabled: config.sound_enabled,
            alert,
            animation_frame: 0,
        }
    }

    /// The field is editable only while the session is fresh; mid-session
    /// edits would contradict resume-without-reparse.
    fn input_unlocked(&self) -> bool {
        matches!(self.timer.state(), TimerState::Idle | TimerState::Finished)
    }

    fn push_input(&mut self, c: char) {
        if self.input_unlocked() && self.duration_input.len() < MAX_INPUT_LEN {
            self.duration_input.push(c);
            self.warning = None;
        }
    }

    fn pop_input(&mut self) {
        if self.input_unlocked() {
            self.duration_input.pop();
            self.warning = None;
        }
    }

    fn on_start(&mut self) {
        match self.timer.start(&self.duration_input) {
            StartOutcome::Started | StartOutcome::Resumed => {
                self.warning = None;
                self.banner_open = false;
                self.next_tick = Some(Instant::now() + TICK_INTERVAL);
            }
            StartOutcome::Rejected => {
                self.warning = Some("Enter a duration longer than 0 seconds.".into());
            }
            StartOutcome::Ignored => {}
        }
    }

    fn on_pause(&mut self) {
        if self.timer.pause() {
            self.next_tick = None;
        }
    }

    fn on_reset(&mut self) {
        self.timer.reset();
        self.next_tick = None;
        self.warning = None;
        self.banner_open = false;
    }

    fn advance(&mut self, now: Instant) {
        self.animation_frame = self.animation_frame.wrapping_add(1) % 20;
        self.poll_tick(now);
    }

    /// Fires the pending tick once its deadline passes and re-arms it one
    /// interval later. The deadline doubles as the cancellation handle:
    /// pause and reset clear it, and the controller's running flag catches
    /// anything that slips through.
    fn poll_tick(&mut self, now: Instant) {
        let Some(deadline) = self.next_tick else { return };
        if now < deadline {
            return;
        }

        if self.timer.tick() {
            self.next_tick = None;
            self.on_finished();
        } else if self.timer.is_running() {
            self.next_tick = Some(deadline + TICK_INTERVAL);
        } else {
            self.next_tick = None;
        }
    }

    fn on_finished(&mut self) {
        self.banner_open = true;
        if self.sound_enabled {
            alert_burst(Arc::clone(&self.alert));
        }
        notify("Time's up! ⏰", "Study session complete. Nice work!");
    }
}

// ============================================================================
// Event Handlers
// ============================================================================

fn handle_input(key: event::KeyEvent, app: &mut AppState) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    // The completion notice is modal until dismissed
    if app.banner_open {
        match key.code {
            KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') => app.banner_open = false,
            KeyCode::Char('r') => app.on_reset(),
            KeyCode::Char('q') => return true,
            _ => {}
        }
        return false;
    }

    if app.current_view == View::Help {
        if matches!(
            key.code,
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('h') | KeyCode::Char('?')
        ) {
            app.current_view = View::Timer;
        }
        return false;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char(c @ ('0'..='9' | ':')) => app.push_input(c),
        KeyCode::Backspace => app.pop_input(),
        KeyCode::Enter | KeyCode::Char('s') => app.on_start(),
        KeyCode::Char(' ') => {
            if app.timer.is_running() {
                app.on_pause();
            } else {
                app.on_start();
            }
        }
        KeyCode::Char('p') => app.on_pause(),
        KeyCode::Char('r') => app.on_reset(),
        KeyCode::Char('h') | KeyCode::Char('?') => app.current_view = View::Help,
        _ => {}
    }

    false
}

// ============================================================================
// UI Rendering
// ============================================================================

fn render_ui(f: &mut Frame, app: &AppState) {
    match app.current_view {
        View::Timer => render_timer(f, app),
        View::Help => render_help(f, app),
    }

    if app.banner_open {
        render_completion(f, app);
    }
}

fn render_timer(f: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1), Constraint::Length(3)])
        .split(f.size());

    // Header
    let header = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(app.theme.border))
        .title(Span::styled(" ⏳ STUDYTIMER ", Style::default()
            .fg(app.theme.accent).add_modifier(Modifier::BOLD)));
    f.render_widget(header, chunks[0]);

    // Main content
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3), Constraint::Length(1),
            Constraint::Length(1), Constraint::Length(1),
            Constraint::Length(1), Constraint::Length(1),
            Constraint::Length(2), Constraint::Length(1),
            Constraint::Length(3), Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(chunks[1]);

    // Duration field
    let unlocked = app.input_unlocked();
    let field_style = if unlocked {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let mut field = vec![Span::styled(&app.duration_input, field_style)];
    if unlocked {
        field.push(Span::styled("█", Style::default().fg(app.theme.accent)));
    }
    let field_title = if unlocked {
        " Duration (MM, MM:SS or HH:MM:SS) "
    } else {
        " Duration (locked while counting) "
    };
    f.render_widget(
        Paragraph::new(Line::from(field)).block(Block::default()
            .title(field_title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(app.theme.border))),
        sections[1]
    );

    // Status
    let (status, status_style) = match app.timer.state() {
        TimerState::Idle => (
            "IDLE".to_string(),
            Style::default().fg(Color::DarkGray),
        ),
        TimerState::Running => (
            format!("{} RUNNING", if app.animation_frame < 10 { "●" } else { "○" }),
            Style::default().fg(app.theme.success).add_modifier(Modifier::BOLD),
        ),
        TimerState::Paused => (
            format!("⏸  PAUSED{}", ".".repeat((app.animation_frame / 5) as usize % 4)),
            Style::default().fg(app.theme.warning).add_modifier(Modifier::BOLD),
        ),
        TimerState::Finished => (
            "✓ FINISHED".to_string(),
            Style::default().fg(app.theme.accent).add_modifier(Modifier::BOLD),
        ),
    };
    f.render_widget(
        Paragraph::new(status).style(status_style).alignment(Alignment::Center),
        sections[3]
    );

    // Countdown readout
    f.render_widget(
        Paragraph::new(app.timer.time_text())
            .style(Style::default().fg(app.theme.readout).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        sections[5]
    );

    // Date/time
    let now = chrono::Local::now();
    let date_lines = vec![
        Line::from(Span::styled(now.format("%A, %B %d, %Y").to_string(), Style::default().fg(Color::Gray))),
        Line::from(Span::styled(now.format("%I:%M %p").to_string(), Style::default().fg(Color::DarkGray))),
    ];
    f.render_widget(Paragraph::new(date_lines).alignment(Alignment::Center), sections[7]);

    // Progress
    f.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).border_type(BorderType::Rounded)
                .border_style(Style::default().fg(app.theme.border)))
            .gauge_style(Style::default().fg(app.theme.progress).bg(Color::Black))
            .ratio(app.timer.progress_ratio()),
        sections[9]
    );

    // Session info
    if app.timer.total_seconds > 0 {
        let session_text = format!(
            "{} elapsed of {}",
            format_seconds(app.timer.elapsed_seconds()),
            format_seconds(app.timer.total_seconds)
        );
        f.render_widget(
            Paragraph::new(session_text).style(Style::default().fg(Color::Gray)).alignment(Alignment::Center),
            sections[10]
        );
    }

    // Warning
    if let Some(warning) = &app.warning {
        f.render_widget(
            Paragraph::new(format!("⚠  {}", warning))
                .style(Style::default().fg(app.theme.warning).add_modifier(Modifier::BOLD))
                .alignment(Alignment::Center),
            sections[11]
        );
    }

    // Controls, styled by the button-state derivation
    let buttons = app.timer.buttons();
    let mut spans = Vec::new();
    spans.extend(hint_spans("S", "Start", buttons.start, app));
    spans.push(Span::raw("  •  "));
    spans.extend(hint_spans("P", "Pause", buttons.pause, app));
    spans.push(Span::raw("  •  "));
    spans.extend(hint_spans("R", "Reset", buttons.reset, app));
    spans.push(Span::raw("  •  "));
    spans.extend(hint_spans("H", "Help", true, app));
    spans.push(Span::raw("  •  "));
    spans.extend(hint_spans("Q", "Quit", true, app));
    f.render_widget(
        Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray)),
        chunks[2]
    );
}

fn hint_spans<'a>(key: &'a str, label: &'a str, enabled: bool, app: &AppState) -> Vec<Span<'a>> {
    if enabled {
        vec![
            Span::styled(key, Style::default().fg(app.theme.accent).add_modifier(Modifier::BOLD)),
            Span::raw(format!(" {}", label)),
        ]
    } else {
        vec![
            Span::styled(key, Style::default().fg(Color::DarkGray)),
            Span::styled(format!(" {}", label), Style::default().fg(Color::DarkGray)),
        ]
    }
}

fn render_help(f: &mut Frame, app: &AppState) {
    let area = centered_rect(70, 80, f.size());

    let help_text = vec![
        Line::from(""),
        Line::from(Span::styled("⌨️  KEYBOARD SHORTCUTS", Style::default().fg(app.theme.accent).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from("  Timer:"),
        help_line("S / Enter", "Start or resume the countdown"),
        help_line("P", "Pause the countdown"),
        help_line("Space", "Toggle between start and pause"),
        help_line("R", "Reset the session"),
        Line::from(""),
        Line::from("  Duration field:"),
        help_line("0-9 and :", "Edit the duration (MM, MM:SS or HH:MM:SS)"),
        help_line("Backspace", "Delete the last character"),
        Line::from(""),
        Line::from("  General:"),
        help_line("H / ?", "Toggle this help"),
        help_line("Q / Esc", "Quit"),
        help_line("Ctrl+C", "Force quit"),
        Line::from(""),
        Line::from(Span::styled("💡 The duration field is editable while the timer is idle or finished",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))),
    ];

    f.render_widget(
        Paragraph::new(help_text)
            .alignment(Alignment::Left)
            .block(Block::default()
                .title(" Help ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(app.theme.border))),
        area
    );
}

fn help_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::raw("    "),
        Span::styled(key, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(format!("  {}", desc)),
    ])
}

fn render_completion(f: &mut Frame, app: &AppState) {
    let area = centered_rect(50, 40, f.size());
    f.render_widget(Clear, area);

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled("⏰ TIME'S UP!", Style::default()
            .fg(app.theme.accent).add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(Span::styled(
            format!("Study session of {} complete.", format_seconds(app.timer.total_seconds)),
            Style::default().fg(Color::White),
        )),
        Line::from(Span::styled("Nice work!", Style::default().fg(app.theme.success))),
        Line::from(""),
        Line::from(Span::styled("Enter dismiss  •  R reset  •  Q quit", Style::default()
            .fg(Color::DarkGray).add_modifier(Modifier::ITALIC))),
    ];

    f.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::default()
                .title(" Session Complete ")
                .title_alignment(Alignment::Center)
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(app.theme.success))),
        area
    );
}

fn centered_rect(w: u16, h: u16, r: Rect) -> Rect {
    let v = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h) / 2),
            Constraint::Percentage(h),
            Constraint::Percentage((100 - h) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w) / 2),
            Constraint::Percentage(w),
            Constraint::Percentage((100 - w) / 2),
        ])
        .split(v[1])[1]
}

// ============================================================================
// Utilities
// ============================================================================

fn notify(title: &str, body: &str) {
    let _ = Notification::new()
        .summary(title)
        .body(body)
        .appname("studytimer")
        .icon("alarm-clock")
        .urgency(Urgency::Critical)
        .show();
}

fn get_theme(name: &str) -> Theme {
    match name {
        "nord" => Theme {
            readout: Color::Rgb(136, 192, 208),
            progress: Color::Rgb(163, 190, 140),
            border: Color::Rgb(94, 129, 172),
            accent: Color::Rgb(180, 142, 173),
            warning: Color::Rgb(235, 203, 139),
            success: Color::Rgb(163, 190, 140),
        },
        "gruvbox" => Theme {
            readout: Color::Rgb(250, 189, 47),
            progress: Color::Rgb(184, 187, 38),
            border: Color::Rgb(215, 153, 33),
            accent: Color::Rgb(254, 128, 25),
            warning: Color::Rgb(251, 73, 52),
            success: Color::Rgb(184, 187, 38),
        },
        "plain" => Theme {
            readout: Color::White,
            progress: Color::Gray,
            border: Color::Gray,
            accent: Color::White,
            warning: Color::Yellow,
            success: Color::Green,
        },
        _ => Theme {
            readout: Color::Rgb(100, 181, 246),
            progress: Color::Rgb(0, 200, 150),
            border: Color::Rgb(0, 160, 255),
            accent: Color::Rgb(255, 140, 0),
            warning: Color::Rgb(255, 90, 90),
            success: Color::Rgb(0, 220, 130),
        },
    }
}

fn get_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(".");
    path.push("studytimer");
    let _ = fs::create_dir_all(&path);
    path.push(filename);
    path
}

fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &PathBuf) -> T {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save_json<T: Serialize>(path: &PathBuf, data: &T) -> io::Result<()> {
    fs::write(path, serde_json::to_string_pretty(data)?)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_path("config.json");
    if !config_path.exists() {
        let _ = save_json(&config_path, &Config::default());
    }
    let mut config = load_json::<Config>(&config_path);

    // CLI overrides
    if let Some(d) = args.duration {
        config.duration = d;
    }
    if let Some(t) = args.theme {
        config.theme = t;
    }
    if args.no_sound {
        config.sound_enabled = false;
    }

    let mut app = AppState::new(config, detect_alert_device());
    if args.autostart {
        app.on_start();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    res
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut AppState) -> Result<()> {
    let mut last_frame = Instant::now();

    loop {
        terminal.draw(|f| render_ui(f, app))?;

        let timeout = POLL_RATE.saturating_sub(last_frame.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if handle_input(key, app) {
                    return Ok(());
                }
            }
        }

        if last_frame.elapsed() >= POLL_RATE {
            app.advance(Instant::now());
            last_frame = Instant::now();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> AppState {
        AppState::new(Config::default(), Arc::new(TerminalBell))
    }

    fn running_controller(input: &str) -> TimerController {
        let mut t = TimerController::new();
        assert_eq!(t.start(input), StartOutcome::Started);
        t
    }

    // ------------------------------ parsing ------------------------------ //

    #[test]
    fn parse_minutes_only() {
        assert_eq!(parse_duration_seconds("25"), 1500);
    }

    #[test]
    fn parse_minutes_and_seconds() {
        assert_eq!(parse_duration_seconds("5:30"), 330);
    }

    #[test]
    fn parse_hours_minutes_seconds() {
        assert_eq!(parse_duration_seconds("1:02:03"), 3723);
    }

    #[test]
    fn parse_rejects_empty_and_garbage() {
        assert_eq!(parse_duration_seconds(""), 0);
        assert_eq!(parse_duration_seconds("   "), 0);
        assert_eq!(parse_duration_seconds("abc"), 0);
        assert_eq!(parse_duration_seconds("5:xx"), 0);
        assert_eq!(parse_duration_seconds("1:2:3:4"), 0);
        assert_eq!(parse_duration_seconds("5:"), 0);
    }

    #[test]
    fn parse_clamps_negative_totals() {
        assert_eq!(parse_duration_seconds("-5"), 0);
        assert_eq!(parse_duration_seconds("0:-5"), 0);
    }

    #[test]
    fn parse_tolerates_whitespace() {
        assert_eq!(parse_duration_seconds(" 10 "), 600);
        assert_eq!(parse_duration_seconds("5 : 30"), 330);
    }

    // ----------------------------- formatting ----------------------------- //

    #[test]
    fn format_pads_all_fields() {
        assert_eq!(format_seconds(3661), "01:01:01");
        assert_eq!(format_seconds(0), "00:00:00");
        assert_eq!(format_seconds(330), "00:05:30");
    }

    #[test]
    fn format_does_not_wrap_hours() {
        assert_eq!(format_seconds(86399), "23:59:59");
        assert_eq!(format_seconds(90000), "25:00:00");
    }

    // ----------------------------- controller ----------------------------- //

    #[test]
    fn start_parses_and_runs() {
        let t = running_controller("0:05");
        assert_eq!(t.total_seconds, 5);
        assert_eq!(t.remaining_seconds, 5);
        assert_eq!(t.state(), TimerState::Running);
    }

    #[test]
    fn start_rejects_invalid_input() {
        let mut t = TimerController::new();
        for input in ["", "abc", "0", "-5"] {
            assert_eq!(t.start(input), StartOutcome::Rejected);
            assert_eq!(t.state(), TimerState::Idle);
            assert_eq!(t.total_seconds, 0);
        }
    }

    #[test]
    fn start_while_running_is_idempotent() {
        let mut t = running_controller("0:10");
        t.tick();
        let remaining = t.remaining_seconds;

        assert_eq!(t.start("1:00"), StartOutcome::Ignored);
        assert_eq!(t.total_seconds, 10);
        assert_eq!(t.remaining_seconds, remaining);
        assert_eq!(t.state(), TimerState::Running);
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let mut t = running_controller("0:30");
        for _ in 0..20 {
            t.tick();
        }
        assert_eq!(t.remaining_seconds, 10);

        assert!(t.pause());
        assert_eq!(t.state(), TimerState::Paused);
        assert_eq!(t.remaining_seconds, 10);

        // Resume ignores the input text entirely
        assert_eq!(t.start("9:99:99"), StartOutcome::Resumed);
        assert_eq!(t.total_seconds, 30);
        assert_eq!(t.remaining_seconds, 10);
    }

    #[test]
    fn pause_when_not_running_is_noop() {
        let mut t = TimerController::new();
        assert!(!t.pause());

        let mut t = running_controller("0:10");
        assert!(t.pause());
        assert!(!t.pause());
        assert_eq!(t.state(), TimerState::Paused);
    }

    #[test]
    fn countdown_finishes_exactly_once() {
        let mut t = running_controller("0:05");

        for _ in 0..4 {
            assert!(!t.tick());
        }
        assert_eq!(t.remaining_seconds, 1);

        assert!(t.tick());
        assert_eq!(t.remaining_seconds, 0);
        assert_eq!(t.state(), TimerState::Finished);

        // Further ticks are stale no-ops and never re-fire completion
        assert!(!t.tick());
        assert!(!t.tick());
        assert_eq!(t.remaining_seconds, 0);
    }

    #[test]
    fn tick_when_not_running_is_noop() {
        let mut t = TimerController::new();
        assert!(!t.tick());
        assert_eq!(t.remaining_seconds, 0);

        let mut t = running_controller("0:10");
        t.pause();
        assert!(!t.tick());
        assert_eq!(t.remaining_seconds, 10);
    }

    #[test]
    fn reset_returns_to_idle_from_any_state() {
        let mut running = running_controller("0:10");
        running.tick();
        let mut paused = running_controller("0:10");
        paused.tick();
        paused.pause();
        let mut finished = running_controller("0:02");
        finished.tick();
        finished.tick();

        for t in [&mut running, &mut paused, &mut finished] {
            t.reset();
            assert_eq!(t.state(), TimerState::Idle);
            assert_eq!(t.total_seconds, 0);
            assert_eq!(t.remaining_seconds, 0);
            assert_eq!(t.time_text(), "00:00:00");
            assert_eq!(t.progress_ratio(), 0.0);
            assert!(!t.buttons().reset);
        }
    }

    #[test]
    fn start_after_finish_parses_a_fresh_session() {
        let mut t = running_controller("0:02");
        t.tick();
        t.tick();
        assert_eq!(t.state(), TimerState::Finished);

        assert_eq!(t.start("0:03"), StartOutcome::Started);
        assert_eq!(t.total_seconds, 3);
        assert_eq!(t.remaining_seconds, 3);
    }

    #[test]
    fn remaining_stays_within_total() {
        let invariant = |t: &TimerController| {
            t.total_seconds == 0 || t.remaining_seconds <= t.total_seconds
        };

        let mut t = TimerController::new();
        assert!(invariant(&t));
        t.start("0:04");
        assert!(invariant(&t));
        for _ in 0..3 {
            t.tick();
            assert!(invariant(&t));
        }
        t.pause();
        assert!(invariant(&t));
        t.start("");
        assert!(invariant(&t));
        t.tick();
        assert!(invariant(&t));
        t.reset();
        assert!(invariant(&t));
    }

    #[test]
    fn button_states_follow_the_state_machine() {
        let mut t = TimerController::new();
        assert_eq!(t.buttons(), ButtonStates { start: true, pause: false, reset: false });

        t.start("0:10");
        assert_eq!(t.buttons(), ButtonStates { start: false, pause: true, reset: true });

        t.pause();
        assert_eq!(t.buttons(), ButtonStates { start: true, pause: false, reset: true });

        t.start("");
        for _ in 0..10 {
            t.tick();
        }
        assert_eq!(t.state(), TimerState::Finished);
        assert_eq!(t.buttons(), ButtonStates { start: true, pause: false, reset: true });
    }

    #[test]
    fn progress_tracks_elapsed_seconds() {
        let mut t = running_controller("0:10");
        assert_eq!(t.elapsed_seconds(), 0);
        assert_eq!(t.progress_ratio(), 0.0);

        for _ in 0..3 {
            t.tick();
        }
        assert_eq!(t.elapsed_seconds(), 3);
        assert!((t.progress_ratio() - 0.3).abs() < 1e-9);
    }

    // ----------------------------- scheduling ----------------------------- //

    #[test]
    fn start_arms_the_pending_tick() {
        let mut app = test_app();
        app.duration_input = "0:05".into();
        app.on_start();
        assert!(app.next_tick.is_some());
        assert_eq!(app.timer.state(), TimerState::Running);
    }

    #[test]
    fn pause_and_reset_cancel_the_pending_tick() {
        let mut app = test_app();
        app.duration_input = "0:05".into();
        app.on_start();
        app.on_pause();
        assert!(app.next_tick.is_none());
        assert_eq!(app.timer.state(), TimerState::Paused);

        app.on_start();
        assert!(app.next_tick.is_some());
        app.on_reset();
        assert!(app.next_tick.is_none());
        assert_eq!(app.timer.state(), TimerState::Idle);
        assert_eq!(app.duration_input, "0:05");
    }

    #[test]
    fn rejected_start_warns_and_stays_idle() {
        let mut app = test_app();
        app.duration_input = "abc".into();
        app.on_start();
        assert!(app.warning.is_some());
        assert!(app.next_tick.is_none());
        assert_eq!(app.timer.state(), TimerState::Idle);

        // Editing the field clears the warning
        app.pop_input();
        assert!(app.warning.is_none());
    }

    #[test]
    fn poll_tick_waits_for_the_deadline_and_rearms() {
        let mut app = test_app();
        app.duration_input = "0:05".into();
        app.on_start();

        let deadline = app.next_tick.unwrap();
        app.poll_tick(deadline - Duration::from_millis(1));
        assert_eq!(app.timer.remaining_seconds, 5);

        app.poll_tick(deadline);
        assert_eq!(app.timer.remaining_seconds, 4);
        assert_eq!(app.next_tick, Some(deadline + TICK_INTERVAL));
    }

    #[test]
    fn stale_armed_deadline_clears_without_decrementing() {
        let mut app = test_app();
        app.duration_input = "0:05".into();
        app.on_start();
        let deadline = app.next_tick.unwrap();

        // Simulate a callback surviving a pause: flag already cleared
        app.timer.pause();
        app.poll_tick(deadline);
        assert!(app.next_tick.is_none());
        assert_eq!(app.timer.remaining_seconds, 5);
    }

    #[test]
    fn input_editing_locks_while_counting() {
        let mut app = test_app();
        app.duration_input.clear();
        app.push_input('2');
        app.push_input('5');
        assert_eq!(app.duration_input, "25");

        app.on_start();
        app.push_input('9');
        app.pop_input();
        assert_eq!(app.duration_input, "25");

        app.on_pause();
        app.push_input('9');
        assert_eq!(app.duration_input, "25");

        app.on_reset();
        app.push_input('9');
        assert_eq!(app.duration_input, "259");
    }

    #[test]
    fn input_length_is_capped() {
        let mut app = test_app();
        app.duration_input.clear();
        for _ in 0..20 {
            app.push_input('1');
        }
        assert_eq!(app.duration_input.len(), MAX_INPUT_LEN);
    }
}

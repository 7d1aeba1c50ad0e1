use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::controller::FrameOutcome;

/// Plain mode prints at most one status line per this interval.
const PLAIN_STATUS_INTERVAL: Duration = Duration::from_secs(1);
/// Window over which the status line averages frames per second.
const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live status line for the control loop.
    pub fn status(&self) -> StatusLine {
        let bar = self
            .use_pretty()
            .then(|| spinner("{spinner} [{elapsed_precise}] {msg}"));
        StatusLine {
            bar,
            fps: FpsCounter::new(FPS_WINDOW),
            last_plain: None,
        }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Per-frame status: current decision, where the box came from, and FPS.
pub struct StatusLine {
    bar: Option<ProgressBar>,
    fps: FpsCounter,
    last_plain: Option<Instant>,
}

impl StatusLine {
    pub fn update(&mut self, outcome: &FrameOutcome) {
        let now = Instant::now();
        let fps = self.fps.tick(now);
        let message = format_status(outcome, fps);

        match &self.bar {
            Some(bar) => bar.set_message(message),
            None => {
                let due = self
                    .last_plain
                    .map_or(true, |last| now.duration_since(last) >= PLAIN_STATUS_INTERVAL);
                if due {
                    eprintln!("{message}");
                    self.last_plain = Some(now);
                }
            }
        }
    }

    pub fn finish(self, summary: &str) {
        match self.bar {
            Some(bar) => bar.finish_with_message(summary.to_string()),
            None => eprintln!("{summary}"),
        }
    }
}

pub fn format_status(outcome: &FrameOutcome, fps: f64) -> String {
    let mut line = format!(
        "frame {} | {} | {}",
        outcome.seq, outcome.decision, outcome.source
    );
    if let Some(bbox) = &outcome.bbox {
        line.push_str(&format!(" {}", bbox));
    }
    if let Some(confidence) = outcome.confidence {
        line.push_str(&format!(" conf {:.2}", confidence));
    }
    line.push_str(&format!(" | {:.1} fps", fps));
    line
}

/// Sliding-window frame rate.
struct FpsCounter {
    window: Duration,
    ticks: std::collections::VecDeque<Instant>,
}

impl FpsCounter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            ticks: std::collections::VecDeque::new(),
        }
    }

    fn tick(&mut self, now: Instant) -> f64 {
        self.ticks.push_back(now);
        while let Some(first) = self.ticks.front() {
            if now.duration_since(*first) > self.window {
                self.ticks.pop_front();
            } else {
                break;
            }
        }
        self.ticks.len() as f64 / self.window.as_secs_f64()
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

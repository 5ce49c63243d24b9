// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Renders deployment events in normal, quiet (CI), and JSON modes.

use serde::Serialize;
use std::time::Instant;

use crate::broadcast::Event;
use crate::deploy::LogLevel;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
#[derive(Debug)]
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a broadcast event.
    pub fn event(&self, event: &Event) {
        match self.mode {
            OutputMode::Normal => {
                if let Some(line) = render_event(event) {
                    println!("{line}");
                }
            }
            OutputMode::Quiet => {}
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(event) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print any serializable value as a result.
    pub fn value<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => println!("{}", human()),
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(value) {
                    println!("{json}");
                }
            }
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                println!("{message}");
            }
            OutputMode::Json => self.json_line("success", message, false),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.json_line("error", message, true),
        }
    }

    fn json_line(&self, event: &str, message: &str, to_stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.start_time.map(|_| self.elapsed_secs()),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if to_stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }
}

/// Human rendering of an event, `None` for events not shown in normal mode.
pub fn render_event(event: &Event) -> Option<String> {
    match event {
        Event::LogLine { text, level, .. } => {
            let marker = match level {
                LogLevel::Info => "  ",
                LogLevel::Warning => "! ",
                LogLevel::Error => "✗ ",
                LogLevel::Success => "✓ ",
            };
            Some(format!("{marker}{text}"))
        }
        Event::StatusChanged { status, .. } => Some(format!("→ {status}")),
        Event::Metrics { host, sample } => Some(format!(
            "{host}: cpu {:.1}% mem {:.1}% disk {:.1}% load {:.2} {:.2} {:.2}",
            sample.cpu_percent,
            sample.memory_percent,
            sample.disk_percent,
            sample.load_avg[0],
            sample.load_avg[1],
            sample.load_avg[2],
        )),
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

// src/display/terminal.rs
//! Terminal status panel for a live recording

use crate::{
    error::{RecorderError, Result},
    geo,
    recorder::{RecorderStatus, SessionState},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::io::{self, Write};

const RULE_WIDTH: usize = 60;
const HELP: &str = "[s]tart  [p]ause  [r]esume  [f]inish  [k]eep awake  [q]uit";

/// Redraws the status panel in place, or prints one line per update when
/// the output is not an interactive terminal.
pub struct TerminalDisplay {
    title: String,
    interactive: bool,
    active: bool,
}

impl TerminalDisplay {
    pub fn new(title: impl Into<String>, interactive: bool) -> Self {
        Self {
            title: title.into(),
            interactive,
            active: false,
        }
    }

    /// Take over the terminal
    pub fn begin(&mut self) -> Result<()> {
        if self.interactive && !self.active {
            execute!(io::stdout(), Hide, DisableLineWrap).map_err(RecorderError::Io)?;
            self.active = true;
        }
        Ok(())
    }

    /// Hand the terminal back
    pub fn end(&mut self) -> Result<()> {
        if self.active {
            execute!(io::stdout(), Show, EnableLineWrap).map_err(RecorderError::Io)?;
            self.active = false;
        }
        Ok(())
    }

    pub fn render(&mut self, status: &RecorderStatus) -> Result<()> {
        let mut stdout = io::stdout();
        if self.interactive {
            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0)).map_err(RecorderError::Io)?;
            self.render_panel(&mut stdout, status)?;
        } else {
            writeln!(stdout, "{}", status_line(status))?;
        }
        stdout.flush()?;
        Ok(())
    }

    fn render_panel(&self, stdout: &mut impl Write, status: &RecorderStatus) -> Result<()> {
        execute!(
            stdout,
            SetForegroundColor(Color::Green),
            Print("=".repeat(RULE_WIDTH)),
            Print("\n"),
            Print(&self.title),
            Print("\n"),
            Print("=".repeat(RULE_WIDTH)),
            Print("\n"),
            ResetColor
        )
        .map_err(RecorderError::Io)?;

        execute!(
            stdout,
            SetForegroundColor(state_color(&status.state)),
            Print(format!("State: {}\n\n", state_text(status))),
            ResetColor
        )
        .map_err(RecorderError::Io)?;

        for line in panel_lines(status) {
            execute!(stdout, Print(line), Print("\n")).map_err(RecorderError::Io)?;
        }

        if let Some(msg) = &status.keep_awake.error {
            execute!(
                stdout,
                SetForegroundColor(Color::Yellow),
                Print(format!("\n  {}\n", msg)),
                ResetColor
            )
            .map_err(RecorderError::Io)?;
        }

        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Color::Green),
            Print("=".repeat(RULE_WIDTH)),
            Print("\n"),
            Print(HELP),
            Print("\n"),
            ResetColor
        )
        .map_err(RecorderError::Io)?;

        Ok(())
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

fn state_color(state: &SessionState) -> Color {
    match state {
        SessionState::Tracking => Color::Green,
        SessionState::Paused => Color::Yellow,
        SessionState::Error(_) => Color::Red,
        SessionState::Idle | SessionState::Ended => Color::Cyan,
    }
}

fn state_text(status: &RecorderStatus) -> String {
    let mut text = match &status.state {
        SessionState::Error(msg) => format!("ERROR - {}", msg),
        other => other.label().to_uppercase(),
    };
    if status.restored {
        text.push_str(" (restored)");
    }
    text
}

fn accuracy_text(accuracy: Option<f64>) -> String {
    match accuracy {
        Some(acc) => format!("±{:.0} m", acc),
        None => "--".to_string(),
    }
}

fn keep_awake_text(status: &RecorderStatus) -> &'static str {
    match (status.keep_awake.requested, status.keep_awake.active) {
        (false, _) => "off",
        (true, true) => "on",
        (true, false) => "requested",
    }
}

/// Body of the panel, one metric per line
pub fn panel_lines(status: &RecorderStatus) -> Vec<String> {
    vec![
        format!("  Time:       {:>12}", geo::format_duration(status.elapsed_sec)),
        format!("  Distance:   {:>12}", geo::format_distance(status.distance_meters)),
        format!(
            "  Pace:       {:>12}",
            geo::format_pace(status.distance_meters, status.elapsed_sec)
        ),
        format!("  Accuracy:   {:>12}", accuracy_text(status.accuracy)),
        format!("  Points:     {:>12}", status.point_count),
        format!("  Keep awake: {:>12}", keep_awake_text(status)),
    ]
}

/// Single-line form for logs and pipes
pub fn status_line(status: &RecorderStatus) -> String {
    format!(
        "{} | {} | {} | {} | acc {} | {} pts",
        state_text(status),
        geo::format_duration(status.elapsed_sec),
        geo::format_distance(status.distance_meters),
        geo::format_pace(status.distance_meters, status.elapsed_sec),
        accuracy_text(status.accuracy),
        status.point_count
    )
}

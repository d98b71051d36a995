//! Live terminal plot: one sparkline row per channel plus a status line.
//!
//! Uses `crossterm` for raw terminal manipulation (alternate screen, cursor
//! positioning, color output). `q`, `Esc` and `Ctrl-C` request a stop; the
//! controller picks that up on its next render tick.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::io::{self, Stdout, Write};
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

use crate::core::errors::{LhmError, Result};
use crate::render::frame::{ChannelTrace, PlotFrame, PlotSurface};

/// Unicode block characters for sparkline rendering (8 levels).
const SPARK_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Width reserved for the name, unit and latest-value columns.
const LABEL_WIDTH: usize = 34;

const TRACE_COLORS: [Color; 7] = [
    Color::Cyan,
    Color::Green,
    Color::Yellow,
    Color::Magenta,
    Color::Blue,
    Color::Red,
    Color::White,
];

/// Render the tail of a trace as a sparkline at most `width` cells wide,
/// scaled to the trace's own min/max.
fn render_sparkline(trace: &ChannelTrace, width: usize) -> String {
    let (Some(lo), Some(hi)) = (trace.min, trace.max) else {
        return String::new();
    };
    let span = hi - lo;
    let start = trace.ys.len().saturating_sub(width);
    trace.ys[start..]
        .iter()
        .map(|y| {
            let norm = if span > 0.0 { (y - lo) / span } else { 0.5 };
            let idx = (norm.clamp(0.0, 1.0) * 7.0).round() as usize;
            SPARK_CHARS[idx.min(7)]
        })
        .collect()
}

fn term_err(e: io::Error) -> LhmError {
    LhmError::Runtime {
        details: format!("terminal: {e}"),
    }
}

/// Full-screen crossterm surface. Restores the terminal on close and on drop.
pub struct TerminalSurface {
    stdout: Stdout,
    active: bool,
}

impl TerminalSurface {
    /// Enter raw mode and the alternate screen.
    pub fn open() -> Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode().map_err(term_err)?;
        if let Err(e) = execute!(stdout, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(term_err(e));
        }
        Ok(Self {
            stdout,
            active: true,
        })
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        execute!(self.stdout, Show, LeaveAlternateScreen)?;
        terminal::disable_raw_mode()
    }

    fn draw_inner(&mut self, frame: &PlotFrame) -> io::Result<()> {
        let (cols, _rows) = terminal::size()?;
        let width = cols as usize;
        let spark_width = width.saturating_sub(LABEL_WIDTH + 2).max(1);
        let out = &mut self.stdout;
        let mut row = 0u16;

        queue!(out, MoveTo(0, 0), Clear(ClearType::All))?;
        queue!(
            out,
            SetForegroundColor(Color::Cyan),
            SetAttribute(Attribute::Bold)
        )?;
        write!(out, " LaHMo live capture v{}", env!("CARGO_PKG_VERSION"))?;
        queue!(out, SetAttribute(Attribute::Reset))?;
        row += 2;

        if frame.is_empty() {
            queue!(out, MoveTo(3, row), SetForegroundColor(Color::DarkGrey))?;
            write!(out, "(waiting for data)")?;
            queue!(out, SetAttribute(Attribute::Reset))?;
            row += 1;
        }

        for (i, trace) in frame.traces.iter().enumerate() {
            queue!(out, MoveTo(1, row), SetForegroundColor(Color::White))?;
            let latest = trace
                .latest()
                .map_or_else(|| "--".to_string(), |v| format!("{v:.2}"));
            let label = format!("{:<6} {:>4} {:>10}", trace.name, trace.unit, latest);
            write!(out, "{label:<22}")?;
            queue!(out, SetForegroundColor(Color::DarkGrey))?;
            let range = match (trace.min, trace.max) {
                (Some(lo), Some(hi)) => format!("[{lo:.1},{hi:.1}]"),
                _ => String::new(),
            };
            write!(out, "{range:<12}")?;
            queue!(out, SetForegroundColor(TRACE_COLORS[i % TRACE_COLORS.len()]))?;
            write!(out, "{}", render_sparkline(trace, spark_width))?;
            queue!(out, SetAttribute(Attribute::Reset))?;
            row += 1;
        }

        row += 1;
        let c = frame.counters;
        queue!(out, MoveTo(1, row), SetForegroundColor(Color::DarkGrey))?;
        write!(
            out,
            "samples {}  last ts {}  accepted {}  dup {}  malformed {}  undecodable {}  sink errors {}",
            frame.sample_count,
            frame
                .latest_timestamp
                .map_or_else(|| "--".to_string(), |t| t.to_string()),
            c.accepted,
            c.duplicates,
            c.malformed,
            c.decode_failures,
            c.sink_errors,
        )?;
        row += 1;
        queue!(out, MoveTo(1, row))?;
        write!(out, "q / Esc / Ctrl-C to stop")?;
        queue!(out, SetAttribute(Attribute::Reset))?;
        out.flush()
    }
}

impl PlotSurface for TerminalSurface {
    fn draw(&mut self, frame: &PlotFrame) -> Result<()> {
        self.draw_inner(frame).map_err(term_err)
    }

    fn stop_requested(&mut self) -> bool {
        // Drain pending key events without blocking the render tick.
        while let Ok(true) = event::poll(Duration::ZERO) {
            if let Ok(Event::Key(key)) = event::read() {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return true,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return true;
                    }
                    _ => {}
                }
            }
        }
        false
    }

    fn close(&mut self) -> Result<()> {
        self.restore().map_err(term_err)
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

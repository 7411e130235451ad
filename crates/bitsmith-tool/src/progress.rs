//! Bouncing progress indicator for long-running tool commands

use crossterm::{
    cursor::MoveToColumn,
    queue,
    terminal::{self, Clear, ClearType},
    tty::IsTty,
};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Redraw interval
pub const DEFAULT_TICK: Duration = Duration::from_millis(75);

/// Space reserved for the elapsed-time suffix
const TIME_WIDTH: usize = 12;
const FALLBACK_WIDTH: usize = 80;
const SPINNER: [char; 4] = ['-', '\\', '|', '/'];

#[derive(Debug)]
pub struct ProgressIndicator {
    left_pad: usize,
    width: usize,
    ticks: usize,
    start: Instant,
    show_time: bool,
    enabled: bool,
}

impl ProgressIndicator {
    /// Indicator drawn at `left_pad` columns, `width` columns wide.
    ///
    /// Drawing is a no-op when stdout is not a terminal.
    pub fn new(left_pad: usize, width: usize) -> Self {
        Self {
            left_pad,
            width,
            ticks: 0,
            start: Instant::now(),
            show_time: false,
            enabled: io::stdout().is_tty(),
        }
    }

    pub fn update(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    pub fn show_time(&mut self) {
        self.show_time = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn draw(&self) {
        if !self.enabled {
            return;
        }
        let mut stdout = io::stdout();
        let _ = write!(stdout, "\r{}\r", self.frame(terminal_width()));
        let _ = stdout.flush();
    }

    pub fn clear(&self) {
        if !self.enabled {
            return;
        }
        let mut stdout = io::stdout();
        let _ = queue!(stdout, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = stdout.flush();
    }

    /// Text of the current frame for a terminal `columns` wide
    pub fn frame(&self, columns: usize) -> String {
        let pad = " ".repeat(self.left_pad);

        let width = if self.width + self.left_pad + 1 + TIME_WIDTH > columns {
            columns.saturating_sub(self.left_pad + 1)
        } else {
            self.width
        };

        if width < 10 {
            return format!("{}{}", pad, SPINNER[self.ticks % SPINNER.len()]);
        }

        // The marker travels across the free cells and back
        let free = width - 5;
        let pos = self.ticks % (2 * free);
        let left = if pos > free { 2 * free - pos } else { pos };
        let right = free - left;

        let time = if self.show_time {
            format!(":  {:<width$}", pretty_duration(self.elapsed()), width = TIME_WIDTH)
        } else {
            String::new()
        };

        format!(
            "{}[{}<=>{}]{}",
            pad,
            " ".repeat(left),
            " ".repeat(right),
            time
        )
    }
}

fn terminal_width() -> usize {
    terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(FALLBACK_WIDTH)
}

/// `1h 2m 3s`, or milliseconds for anything under a second
pub fn pretty_duration(dur: Duration) -> String {
    let mut secs = dur.as_secs();
    let mut out = String::new();

    if secs >= 3600 {
        out.push_str(&format!("{}h ", secs / 3600));
        secs %= 3600;
    }
    if secs >= 60 {
        out.push_str(&format!("{}m ", secs / 60));
        secs %= 60;
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    } else if out.is_empty() {
        out = format!("{}ms", dur.as_millis());
    }
    out
}

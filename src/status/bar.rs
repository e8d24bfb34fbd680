//! Live one-line summary of the run.
//!
//! On a terminal the line is redrawn in place and streamed task output is
//! printed above it. Anywhere else (pipes, CI logs) the bar falls back to
//! plain lines, printed at most once per interval. Write failures never reach
//! the dispatcher: the bar degrades and then goes quiet.

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

use crate::flog_debug;
use crate::orchestration::RunCounts;

/// Minimum spacing between plain-mode status lines.
pub const DEFAULT_PLAIN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Interactive,
    Plain,
    Silent,
}

pub struct StatusBar {
    out: Box<dyn Write + Send>,
    mode: Mode,
    plain_interval: Duration,
    current: Option<String>,
    drawn: bool,
    last_plain: Option<(Instant, String)>,
}

impl StatusBar {
    pub fn new(out: Box<dyn Write + Send>, interactive: bool) -> Self {
        Self {
            out,
            mode: if interactive {
                Mode::Interactive
            } else {
                Mode::Plain
            },
            plain_interval: DEFAULT_PLAIN_INTERVAL,
            current: None,
            drawn: false,
            last_plain: None,
        }
    }

    /// Status bar on stdout, interactive when stdout is a terminal.
    pub fn stdout() -> Self {
        let interactive = std::io::stdout().is_terminal();
        Self::new(Box::new(std::io::stdout()), interactive)
    }

    pub fn with_plain_interval(mut self, interval: Duration) -> Self {
        self.plain_interval = interval;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.mode == Mode::Interactive
    }

    /// The status text for a set of counts.
    pub fn format_line(counts: &RunCounts) -> String {
        format!(
            "Queued: {} | Running: {} | Success: {} | Failure: {} | Total: {}",
            counts.pending,
            counts.running,
            counts.success,
            counts.failure,
            counts.total()
        )
    }

    /// Show the latest counts.
    pub fn render(&mut self, counts: &RunCounts) {
        let line = Self::format_line(counts);
        self.current = Some(line.clone());
        match self.mode {
            Mode::Interactive => {
                let result = self.draw(&line);
                self.check(result);
            }
            Mode::Plain => self.plain(line, false),
            Mode::Silent => {}
        }
    }

    /// Print a line of task output above the status line.
    pub fn print_line(&mut self, line: &str) {
        if self.mode == Mode::Silent {
            return;
        }
        let result = self.print_above(line);
        self.check(result);
    }

    /// Leave the final status on its own line.
    pub fn finish(&mut self) {
        let Some(line) = self.current.clone() else {
            return;
        };
        let result = match self.mode {
            Mode::Interactive => self.draw(&line).and_then(|_| {
                self.drawn = false;
                writeln!(self.out).and_then(|_| self.out.flush())
            }),
            Mode::Plain => {
                self.plain(line, true);
                Ok(())
            }
            Mode::Silent => Ok(()),
        };
        self.check(result);
    }

    fn draw(&mut self, line: &str) -> std::io::Result<()> {
        self.out
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(line))?;
        self.out.flush()?;
        self.drawn = true;
        Ok(())
    }

    fn print_above(&mut self, line: &str) -> std::io::Result<()> {
        if self.mode == Mode::Interactive && self.drawn {
            self.out
                .queue(MoveToColumn(0))?
                .queue(Clear(ClearType::CurrentLine))?;
        }
        writeln!(self.out, "{}", line)?;
        if self.mode == Mode::Interactive {
            if let Some(current) = self.current.clone() {
                return self.draw(&current);
            }
            self.drawn = false;
        }
        self.out.flush()
    }

    fn plain(&mut self, line: String, force: bool) {
        let now = Instant::now();
        let due = match &self.last_plain {
            None => true,
            Some((_, last)) if *last == line => false,
            Some((at, _)) => force || now.duration_since(*at) >= self.plain_interval,
        };
        if !due {
            return;
        }
        let result = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if result.is_ok() {
            self.last_plain = Some((now, line));
        }
        self.check(result);
    }

    fn check(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            let next = match self.mode {
                Mode::Interactive => Mode::Plain,
                _ => Mode::Silent,
            };
            flog_debug!("status bar write failed ({}), {:?} -> {:?}", e, self.mode, next);
            self.mode = next;
            self.drawn = false;
        }
    }
}

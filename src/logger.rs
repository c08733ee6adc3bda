//! Terminal output: the `log!` macro, per-phase progress bars and the
//! warning sink every recoverable problem goes through.
//!
//! Progress bars and cursor movement are only drawn when stdout is a
//! terminal. Otherwise `log!` prints plain, untruncated lines.
//!
//! # Example
//!
//! ```ignore
//! log!("read"; "{} added, {} changed, {} removed", added, changed, removed);
//!
//! if let Some(progress) = ProgressBars::new_filtered(&[("read", 100)]) {
//!     progress.inc("read", 1);
//! }
//! ```

use crate::error::BuildError;
use colored::{ColoredString, Colorize};
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType, size},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{IsTerminal, Write, stdout},
    sync::{
        LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Terminal facts, detected once.
struct Terminal {
    width: usize,
    interactive: bool,
}

static TERMINAL: LazyLock<Terminal> = LazyLock::new(|| Terminal {
    width: size().map_or(120, |(width, _)| usize::from(width)),
    interactive: stdout().is_terminal(),
});

/// Rows reserved for progress bars below the log output.
static RESERVED_ROWS: AtomicUsize = AtomicUsize::new(0);

const BAR_MIN: usize = 10;
const BAR_MAX: usize = 40;

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix.
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Print `[module] message`, above any progress bars.
///
/// On a terminal, single-line messages are cut to the terminal width.
pub fn log(module: &str, message: &str) {
    let prefix = prefix(module);
    let rows = RESERVED_ROWS.load(Ordering::SeqCst);
    let mut out = stdout().lock();

    let line = if TERMINAL.interactive && !message.contains('\n') {
        fit(message, TERMINAL.width.saturating_sub(module.len() + 3))
    } else {
        message
    };

    if TERMINAL.interactive && rows > 0 {
        let up = u16::try_from(rows).unwrap_or(u16::MAX);
        execute!(out, cursor::MoveUp(up), Clear(ClearType::FromCursorDown)).ok();
    }
    writeln!(out, "{prefix} {line}").ok();
    if TERMINAL.interactive {
        for _ in 0..rows {
            writeln!(out).ok();
        }
    }
    out.flush().ok();
}

fn prefix(module: &str) -> ColoredString {
    let text = format!("[{module}]");
    match module.to_ascii_lowercase().as_str() {
        "read" | "env" => text.bright_magenta().bold(),
        "write" => text.bright_green().bold(),
        "warning" => text.bright_red(),
        "error" => text.bright_red().bold(),
        _ => text.bright_yellow().bold(),
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn fit(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let end = (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    &s[..end]
}

// ============================================================================
// Progress Bars
// ============================================================================

/// `[████░░░░] 3/8`, with `width` cells between the brackets.
fn render_bar(done: usize, total: usize, width: usize) -> String {
    let done = done.min(total);
    let filled = if total == 0 { 0 } else { done * width / total };
    format!(
        "[{}{}] {done}/{total}",
        "█".repeat(filled),
        "░".repeat(width - filled)
    )
}

/// One bar per build phase, drawn on reserved rows under the log output.
///
/// Only the coordinating thread advances bars; the lock keeps a redraw from
/// interleaving with a warning flushed at the same moment.
pub struct ProgressBars {
    bars: Vec<Bar>,
    lock: Mutex<()>,
}

struct Bar {
    name: &'static str,
    total: usize,
    done: AtomicUsize,
}

impl ProgressBars {
    pub fn new(phases: &[(&'static str, usize)]) -> Self {
        let mut out = stdout().lock();
        for _ in phases {
            writeln!(out).ok();
        }
        out.flush().ok();
        RESERVED_ROWS.store(phases.len(), Ordering::SeqCst);

        let bars = phases
            .iter()
            .map(|&(name, total)| Bar {
                name,
                total,
                done: AtomicUsize::new(0),
            })
            .collect();
        Self {
            bars,
            lock: Mutex::new(()),
        }
    }

    /// Bars for the non-empty phases.
    ///
    /// `None` when stdout is not a terminal or there is at most one item.
    pub fn new_filtered(phases: &[(&'static str, usize)]) -> Option<Self> {
        let phases: Vec<_> = phases.iter().filter(|(_, n)| *n > 0).copied().collect();
        let items: usize = phases.iter().map(|(_, n)| n).sum();
        (TERMINAL.interactive && items > 1).then(|| Self::new(&phases))
    }

    /// Advance the bar called `name` by `n` items.
    pub fn inc(&self, name: &str, n: usize) {
        let Some((row, bar)) = self.bars.iter().enumerate().find(|(_, bar)| bar.name == name)
        else {
            return;
        };
        let done = bar.done.fetch_add(n, Ordering::Relaxed) + n;
        self.draw(row, bar, done);
    }

    fn draw(&self, row: usize, bar: &Bar, done: usize) {
        let _guard = self.lock.lock();

        // "[name] [" + "] " + count
        let count_len = format!("{done}/{}", bar.total).len();
        let room = TERMINAL.width.saturating_sub(bar.name.len() + 6 + count_len);
        let line = render_bar(done, bar.total, room.clamp(BAR_MIN, BAR_MAX));
        let up = u16::try_from(self.bars.len() - row).unwrap_or(u16::MAX);

        let mut out = stdout().lock();
        execute!(out, cursor::MoveUp(up), Clear(ClearType::CurrentLine)).ok();
        write!(out, "{} {line}", prefix(bar.name)).ok();
        execute!(out, cursor::MoveDown(up)).ok();
        write!(out, "\r").ok();
        out.flush().ok();
    }

    /// Remove the bars and release their rows.
    pub fn finish(&self) {
        if RESERVED_ROWS.swap(0, Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock();
        let rows = u16::try_from(self.bars.len()).unwrap_or(u16::MAX);
        let mut out = stdout().lock();
        execute!(out, cursor::MoveUp(rows), Clear(ClearType::FromCursorDown)).ok();
        out.flush().ok();
    }
}

impl Drop for ProgressBars {
    fn drop(&mut self) {
        self.finish();
    }
}

// ============================================================================
// Warnings
// ============================================================================

/// Where a warning points: a document, optionally a 1-based line in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub docname: String,
    pub line: Option<usize>,
}

impl Location {
    pub fn new(docname: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            docname: docname.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.docname),
            None => f.write_str(&self.docname),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub location: Option<Location>,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Collects warnings for one build.
///
/// With `fatal` set, [`warn`](Self::warn) returns [`BuildError::Warning`]
/// instead of recording. While a [`PendingWarnings`] guard is alive,
/// warnings are recorded but printing is deferred until the guard drops.
#[derive(Debug, Default)]
pub struct WarningSink {
    fatal: bool,
    state: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    records: Vec<Warning>,
    pending: Option<Vec<Warning>>,
}

impl WarningSink {
    pub fn new(fatal: bool) -> Self {
        Self {
            fatal,
            state: Mutex::default(),
        }
    }

    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn warn(
        &self,
        location: Option<Location>,
        message: impl Into<String>,
    ) -> Result<(), BuildError> {
        let message = message.into();
        if self.fatal {
            return Err(BuildError::Warning { location, message });
        }

        let warning = Warning { location, message };
        let mut state = self.state.lock();
        match &mut state.pending {
            Some(buffer) => buffer.push(warning.clone()),
            None => log!("warning"; "{warning}"),
        }
        state.records.push(warning);
        Ok(())
    }

    /// Shorthand for a warning located in `docname`.
    pub fn warn_at(
        &self,
        docname: &str,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Result<(), BuildError> {
        self.warn(Some(Location::new(docname, line)), message)
    }

    pub fn count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn records(&self) -> Vec<Warning> {
        self.state.lock().records.clone()
    }

    /// Defer printing until the returned guard is dropped.
    ///
    /// Nested guards are no-ops; the outermost one flushes.
    pub fn pending(&self) -> PendingWarnings<'_> {
        let mut state = self.state.lock();
        let owner = state.pending.is_none();
        if owner {
            state.pending = Some(Vec::new());
        }
        PendingWarnings { sink: self, owner }
    }
}

/// Guard returned by [`WarningSink::pending`].
pub struct PendingWarnings<'a> {
    sink: &'a WarningSink,
    owner: bool,
}

impl Drop for PendingWarnings<'_> {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let buffered = self.sink.state.lock().pending.take().unwrap_or_default();
        for warning in buffered {
            log!("warning"; "{warning}");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

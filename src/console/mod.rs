//! Console buffer — bounded accumulator for supervised-process output.
//!
//! Appended lines land in a pending accumulation first; a single debounced
//! flush task folds them into the retained window, so a process emitting
//! hundreds of lines per second causes one buffer update per burst instead
//! of one per line. The retained window keeps at most `max_lines` lines,
//! discarding the oldest. All state lives behind one mutex, so readers never
//! observe a torn line or a half-finished trim.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default maximum number of retained console lines.
pub const DEFAULT_MAX_LINES: usize = 200;

/// Default pattern for extracting log levels from Minecraft-style lines
/// (`[12:00:00] [Server thread/INFO]: ...`).
pub const DEFAULT_LOG_PATTERN: &str = r"/(?P<level>INFO|WARN|ERROR|DEBUG|FATAL)\]";

/// How long a burst of appends may accumulate before the pending lines are
/// folded into the retained window.
const FLUSH_COALESCE: Duration = Duration::from_millis(50);

/// Parsed severity of a console line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Default)]
struct BufferState {
    retained: VecDeque<String>,
    /// Lines produced since the last flush.
    pending: Vec<String>,
    flush_scheduled: bool,
    total_lines: u64,
}

pub struct ConsoleBuffer {
    state: Mutex<BufferState>,
    max_lines: usize,
    pattern: Option<Regex>,
    /// Handle to ourselves for the debounced flush task.
    me: Weak<ConsoleBuffer>,
}

impl ConsoleBuffer {
    pub fn new(max_lines: usize) -> Arc<Self> {
        Self::with_pattern(max_lines, Some(DEFAULT_LOG_PATTERN))
    }

    /// Create a buffer with an optional level-classification regex. The
    /// pattern should have a named capture group `level` matching INFO,
    /// WARN, ERROR, DEBUG etc.
    pub fn with_pattern(max_lines: usize, pattern: Option<&str>) -> Arc<Self> {
        let pattern = pattern.and_then(|pat| match Regex::new(pat) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Invalid log_pattern '{}': {}, level classification disabled", pat, e);
                None
            }
        });
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(BufferState::default()),
            max_lines: max_lines.max(1),
            pattern,
            me: me.clone(),
        })
    }

    // A panicked appender must not take the console down with it.
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parse the severity of a console line. No pattern match means `Info`.
    pub fn classify(&self, line: &str) -> LogLevel {
        if let Some(re) = &self.pattern {
            if let Some(caps) = re.captures(line) {
                if let Some(level) = caps.name("level") {
                    return match level.as_str().to_uppercase().as_str() {
                        "ERROR" | "FATAL" => LogLevel::Error,
                        "WARN" | "WARNING" => LogLevel::Warn,
                        "DEBUG" | "TRACE" => LogLevel::Debug,
                        _ => LogLevel::Info,
                    };
                }
            }
        }
        LogLevel::Info
    }

    /// Append one output line. The line goes into the pending accumulation;
    /// if no flush is scheduled yet, one debounced flush task is spawned to
    /// fold the whole burst into the retained window.
    pub fn append(&self, line: &str) {
        let mut st = self.lock();
        st.pending.push(line.to_string());
        st.total_lines += 1;
        if !st.flush_scheduled {
            if let Some(buf) = self.me.upgrade() {
                st.flush_scheduled = true;
                tokio::spawn(async move {
                    tokio::time::sleep(FLUSH_COALESCE).await;
                    buf.flush();
                });
            }
        }
    }

    fn flush(&self) {
        let mut st = self.lock();
        Self::fold(&mut st, self.max_lines);
        st.flush_scheduled = false;
    }

    /// Full current text, most-recent-last, every line whole. Pending lines
    /// are folded in under the same lock, so the result never lags behind a
    /// burst that has not been flushed yet.
    pub fn snapshot(&self) -> String {
        let mut st = self.lock();
        Self::fold(&mut st, self.max_lines);
        let mut text = String::new();
        for line in &st.retained {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Empty the buffer and reset the line counter.
    pub fn clear(&self) {
        let mut st = self.lock();
        st.retained.clear();
        st.pending.clear();
        st.total_lines = 0;
    }

    /// Running line counter; clamped to the capacity once trimming starts.
    pub fn line_count(&self) -> u64 {
        self.lock().total_lines
    }

    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    fn fold(st: &mut BufferState, cap: usize) {
        for line in st.pending.drain(..) {
            st.retained.push_back(line);
        }
        let trimmed = st.retained.len() > cap;
        while st.retained.len() > cap {
            st.retained.pop_front();
        }
        if trimmed {
            st.total_lines = cap as u64;
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// Lookback horizon for findings. Exactly one mode is configured.
///
/// In TOML this reads as `[recency] hours = 12` or `[recency] days = 5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyWindow {
    Hours(u32),
    Days(u32),
}

impl Default for RecencyWindow {
    fn default() -> Self {
        RecencyWindow::Days(5)
    }
}

impl RecencyWindow {
    pub fn duration(&self) -> Duration {
        match *self {
            RecencyWindow::Hours(n) => Duration::hours(i64::from(n)),
            RecencyWindow::Days(n) => Duration::days(i64::from(n)),
        }
    }

    pub fn magnitude(&self) -> u32 {
        match *self {
            RecencyWindow::Hours(n) | RecencyWindow::Days(n) => n,
        }
    }
}

impl std::fmt::Display for RecencyWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecencyWindow::Hours(n) => write!(f, "last {n} hours"),
            RecencyWindow::Days(n) => write!(f, "last {n} days"),
        }
    }
}

/// The recency predicate, bound to the `now` of one evaluation run.
#[derive(Debug, Clone, Copy)]
pub struct RecencyFilter {
    window: RecencyWindow,
    now: DateTime<Utc>,
}

impl RecencyFilter {
    pub fn new(window: RecencyWindow, now: DateTime<Utc>) -> Self {
        Self { window, now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// True when `at` is no older than the window. Future instants count as recent.
    pub fn is_recent(&self, at: DateTime<Utc>) -> bool {
        self.now - at <= self.window.duration()
    }

    /// Same as [`is_recent`](Self::is_recent) for a raw portal timestamp. Missing or
    /// unparsable input is never recent.
    pub fn is_recent_raw(&self, raw: Option<&str>) -> bool {
        timestamp::normalize(raw).is_ok_and(|at| self.is_recent(at))
    }

    pub fn is_recent_opt(&self, at: Option<DateTime<Utc>>) -> bool {
        at.is_some_and(|at| self.is_recent(at))
    }
}

use crate::graph::StateId;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Tracks the health of one browser session during crawling
///
/// This structure maintains per-session counters used to decide when a
/// session should be replaced and to report pool activity.
#[derive(Debug, Clone)]
pub struct SessionHealth {
    /// When the browser behind this session was started
    pub started_at: DateTime<Utc>,

    /// Number of actions dispatched through this session
    pub dispatch_count: u32,

    /// Number of dispatches that failed
    pub failure_count: u32,

    /// Failures since the last successful dispatch
    pub consecutive_failures: u32,

    /// Time of the last dispatch
    pub last_dispatch_time: Option<Instant>,

    /// The state the browser is known to display, if any
    pub current_state: Option<StateId>,
}

impl SessionHealth {
    /// Creates a new SessionHealth for a freshly started browser
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            dispatch_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_dispatch_time: None,
            current_state: None,
        }
    }

    /// Records that an action was dispatched
    pub fn record_dispatch(&mut self, now: Instant) {
        self.dispatch_count += 1;
        self.last_dispatch_time = Some(now);
    }

    /// Records a successful dispatch that left the browser on `state`
    pub fn record_success(&mut self, state: StateId) {
        self.consecutive_failures = 0;
        self.current_state = Some(state);
    }

    /// Records a failed dispatch
    ///
    /// The browser's position is unknown afterwards, so the next dispatch
    /// starts with a reset.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.current_state = None;
    }

    /// Forgets the browser's position (after a reset or a replay)
    pub fn clear_position(&mut self) {
        self.current_state = None;
    }

    /// Returns the fraction of dispatches that failed
    pub fn failure_rate(&self) -> f64 {
        if self.dispatch_count == 0 {
            0.0
        } else {
            f64::from(self.failure_count) / f64::from(self.dispatch_count)
        }
    }

    /// Time since the last dispatch, or None if the session never dispatched
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_dispatch_time
            .map(|last| now.saturating_duration_since(last))
    }
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

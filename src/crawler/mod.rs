//! Crawler module for state-based exploration
//!
//! This module contains the core crawling logic, including:
//! - The shared frontier of actions waiting to be fired
//! - The workers that replay, fire, capture and integrate actions
//! - Overall run coordination (limits, stop signal, persistence, reports)

mod coordinator;
mod scheduler;
mod worker;

pub use coordinator::{run_crawl, Coordinator, StopHandle};
pub use scheduler::{Frontier, QueuedAction};

use crate::storage::RunStatus;
use std::fmt;
use std::time::Duration;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// No action is left to fire
    FrontierExhausted,
    /// `max-states` distinct states were discovered
    StateLimit,
    /// `max-runtime-secs` elapsed
    RuntimeLimit,
    /// An operator asked the run to stop
    Stopped,
    /// No browser session is usable any more
    AllSessionsLost,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrontierExhausted => "frontier-exhausted",
            Self::StateLimit => "state-limit",
            Self::RuntimeLimit => "runtime-limit",
            Self::Stopped => "stopped",
            Self::AllSessionsLost => "all-sessions-lost",
        }
    }

    /// Final status of a run that ended for this reason
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::FrontierExhausted | Self::StateLimit | Self::RuntimeLimit => {
                RunStatus::Completed
            }
            Self::Stopped => RunStatus::Stopped,
            Self::AllSessionsLost => RunStatus::Failed,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    pub termination: TerminationReason,
    /// Distinct states in the final graph
    pub states: usize,
    /// Transitions in the final graph
    pub edges: usize,
    /// Actions given up after retries or left out of scope
    pub failed_actions: usize,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Returns false when the run lost every browser session
    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }
}

/// Action candidate lifecycle definitions
///
/// This module defines all states an action candidate can be in from the
/// moment it is queued on the frontier until it produced an edge or was given up.
use std::fmt;

/// Represents the current state of an action candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateState {
    // ===== Active States =====
    /// Candidate is on the frontier waiting for a browser session
    Queued,

    /// Candidate has been handed to a browser session
    Dispatching,

    /// A dispatch failed and the candidate is back on the frontier
    Retrying,

    // ===== Terminal Success States =====
    /// Candidate was fired and its resulting state integrated into the graph
    Taken,

    // ===== Terminal Error States =====
    /// Retries were exhausted (dispatch or capture kept failing)
    Failed,

    /// Firing the candidate left the crawl scope; no state was recorded
    Skipped,
}

impl CandidateState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if this is an active state (candidate may still be dispatched)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Dispatching | Self::Retrying)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Taken)
    }

    /// Returns true if the candidate can be put back on the frontier
    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Dispatching)
    }

    /// Converts the candidate state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatching => "dispatching",
            Self::Retrying => "retrying",
            Self::Taken => "taken",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a candidate state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "dispatching" => Some(Self::Dispatching),
            "retrying" => Some(Self::Retrying),
            "taken" => Some(Self::Taken),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all possible candidate states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Dispatching,
            Self::Retrying,
            Self::Taken,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

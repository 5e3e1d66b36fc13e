//! State module for tracking crawl progress
//!
//! This module provides the lifecycles that drive a crawl.
//!
//! # Components
//!
//! - `CandidateState`: Tracks an action candidate from queueing to its outcome
//! - `SchedulerPhase`: The per-worker scheduling state machine
//! - `SessionHealth`: Tracks per-session dispatch counters and failures

mod candidate_state;
mod scheduler_phase;
mod session_health;

// Re-export main types
pub use candidate_state::CandidateState;
pub use scheduler_phase::SchedulerPhase;
pub use session_health::SessionHealth;

use crate::CrawlError;
use std::fmt;

/// Phase of a crawl worker
///
/// Every worker walks `Idle -> Dispatching -> AwaitingResult -> Integrating`
/// and loops back to `Dispatching` for the next frontier item. Only
/// `AwaitingResult` blocks on the browser. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerPhase {
    Idle,
    Dispatching,
    AwaitingResult,
    Integrating,
    Terminated,
}

impl SchedulerPhase {
    /// Returns true if the machine may move from `self` to `next`
    pub fn can_transition_to(&self, next: SchedulerPhase) -> bool {
        use SchedulerPhase::*;

        matches!(
            (self, next),
            (Idle, Dispatching)
                | (Dispatching, AwaitingResult)
                // nothing left to pop or a stop was requested
                | (Dispatching, Terminated)
                | (AwaitingResult, Integrating)
                | (Integrating, Dispatching)
                | (Integrating, Terminated)
                | (Idle, Terminated)
        )
    }

    /// Moves to `next`, or fails without changing phase
    pub fn transition(&mut self, next: SchedulerPhase) -> Result<(), CrawlError> {
        if !self.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::AwaitingResult => "awaiting_result",
            Self::Integrating => "integrating",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

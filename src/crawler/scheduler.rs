//! Frontier of actions waiting to be dispatched
//!
//! This module handles:
//! - Priority queue of (source state, action) pairs
//! - Breadth-first, depth-first and seeded random ordering
//! - Tracking of in-flight work so idle workers wait instead of exiting
//! - The stop flag that ends a run early

use crate::candidates::Action;
use crate::config::FrontierOrder;
use crate::graph::StateId;
use crate::state::CandidateState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// An action queued for dispatch from a recorded state
#[derive(Debug, Clone)]
pub struct QueuedAction {
    /// State the action is fired from
    pub source: StateId,

    /// Depth of the source state
    pub depth: u32,

    pub action: Action,

    /// Failed dispatches so far
    pub attempts: u32,

    /// Lifecycle of the candidate
    pub state: CandidateState,

    /// Ordering key (lower leaves the frontier first)
    rank: u64,

    /// Insertion sequence, breaks rank ties
    seq: u64,
}

impl QueuedAction {
    pub fn signature(&self) -> String {
        self.action.signature()
    }
}

// Reverse comparison so the lowest (rank, seq) is popped first from BinaryHeap
impl Ord for QueuedAction {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedAction {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for QueuedAction {}

struct FrontierInner {
    heap: BinaryHeap<QueuedAction>,
    next_seq: u64,
    rng: StdRng,
}

/// Shared work queue of a run
///
/// Every worker pulls from the same frontier. An item handed out by `next`
/// counts as in flight until the worker calls `complete` or `requeue`; while
/// anything is in flight an empty frontier is not exhausted, because the
/// result may still add work.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    order: FrontierOrder,
    in_flight: AtomicUsize,
    stopped: AtomicBool,
    notify: Notify,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `order` - How queued actions are ranked
    /// * `seed` - Seed of the random order
    pub fn new(order: FrontierOrder, seed: u64) -> Self {
        Self {
            inner: Mutex::new(FrontierInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                rng: StdRng::seed_from_u64(seed),
            }),
            order,
            in_flight: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rank(&self, inner: &mut FrontierInner, depth: u32) -> u64 {
        match self.order {
            FrontierOrder::BreadthFirst => u64::from(depth),
            FrontierOrder::DepthFirst => u64::from(u32::MAX - depth),
            FrontierOrder::Random => inner.rng.random(),
        }
    }

    /// Queues the actions of a state, keeping their order for equal ranks
    pub fn push_all(&self, source: StateId, depth: u32, actions: impl IntoIterator<Item = Action>) {
        let mut inner = self.lock();
        for action in actions {
            let rank = self.rank(&mut inner, depth);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedAction {
                source,
                depth,
                action,
                attempts: 0,
                state: CandidateState::Queued,
                rank,
                seq,
            });
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Takes the next action
    ///
    /// Waits while the frontier is empty but other items are in flight.
    ///
    /// # Returns
    ///
    /// * `Some(QueuedAction)` - Work to do; the caller must `complete` or
    ///   `requeue` it
    /// * `None` - The frontier is exhausted or the run was stopped
    pub async fn next(&self) -> Option<QueuedAction> {
        loop {
            // Created before the check so a wakeup between check and await is not lost
            let notified = self.notify.notified();

            if self.is_stopped() {
                return None;
            }

            {
                let mut inner = self.lock();
                if let Some(mut item) = inner.heap.pop() {
                    self.in_flight.fetch_add(1, AtomicOrdering::SeqCst);
                    item.state = if item.attempts == 0 {
                        CandidateState::Dispatching
                    } else {
                        CandidateState::Retrying
                    };
                    return Some(item);
                }
                if self.in_flight.load(AtomicOrdering::SeqCst) == 0 {
                    drop(inner);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Puts an item back after a failed dispatch
    ///
    /// It goes behind every item of equal rank already queued.
    pub fn requeue(&self, mut item: QueuedAction) {
        let mut inner = self.lock();
        item.attempts += 1;
        item.state = CandidateState::Queued;
        item.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(item);
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Marks an item handed out by `next` as finished
    pub fn complete(&self) {
        // Decremented under the lock so `next` never sees an empty heap and a
        // stale in-flight count at once
        let inner = self.lock();
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Stops the run; `next` returns None from now on
    pub fn stop(&self) {
        if !self.stopped.swap(true, AtomicOrdering::SeqCst) {
            tracing::debug!("Frontier stopped with {} queued action(s)", self.len());
        }
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    /// Number of queued actions
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Number of actions handed out and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(AtomicOrdering::SeqCst)
    }
}

//! State graph
//!
//! This module holds the directed graph of discovered application states and
//! the actions that lead from one to another.
//!
//! # Guarantees
//!
//! - At most one state per fingerprint (near-duplicates collapse when a
//!   similarity threshold is configured), even under concurrent discovery
//! - At most one edge per `(source state, action signature)`
//! - Nothing is ever removed; state ids are dense and stable
//!
//! All mutation happens under one write lock, so an edge is only ever
//! recorded between two states that both exist.

mod export;

use crate::candidates::Action;
use crate::config::Limit;
use crate::fingerprint::Fingerprint;
use crate::forms::FilledInput;
use chrono::{DateTime, Utc};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

pub use export::{GraphExport, StateRecord, TransitionRecord};

/// Dense identifier of a state; the root state is always `StateId(0)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u32);

impl StateId {
    pub const ROOT: StateId = StateId(0);

    fn index(self) -> NodeIndex {
        NodeIndex::new(self.0 as usize)
    }

    fn from_index(index: NodeIndex) -> Self {
        StateId(index.index() as u32)
    }

    /// Human-readable name: `index` for the root, `stateN` otherwise
    pub fn name(&self) -> String {
        if *self == Self::ROOT {
            "index".to_string()
        } else {
            format!("state{}", self.0)
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A discovered state
#[derive(Debug, Clone)]
pub struct StateVertex {
    pub id: StateId,
    pub name: String,
    pub fingerprint: Fingerprint,
    pub url: String,
    /// Number of edges on the path that first reached the state
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    pub dom: Arc<str>,
    pub screenshot: Option<Arc<[u8]>>,
}

/// What was observed when a state was reached
#[derive(Debug, Clone)]
pub struct ObservedState {
    pub url: String,
    pub depth: u32,
    pub dom: Arc<str>,
    pub screenshot: Option<Arc<[u8]>>,
}

/// A recorded transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    pub action: Action,
    /// Form values typed before the action was fired
    pub inputs: Vec<FilledInput>,
    pub created_at: DateTime<Utc>,
}

/// Returned by `add_state` when a new state would exceed `max-states`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("state limit of {limit} reached")]
pub struct StateLimitReached {
    pub limit: u32,
}

/// Narrow read-only access to a graph, handed to plugins
pub trait GraphView {
    fn state_count(&self) -> usize;
    fn edge_count(&self) -> usize;
    fn state(&self, id: StateId) -> Option<StateVertex>;
    fn states(&self) -> Vec<StateVertex>;
    fn transitions(&self) -> Vec<Transition>;
}

#[derive(Default)]
struct GraphInner {
    graph: DiGraph<StateVertex, Transition>,
    by_fingerprint: HashMap<Fingerprint, StateId>,
    edge_signatures: HashSet<(StateId, String)>,
    taken: HashMap<StateId, HashSet<String>>,
    pending: HashMap<StateId, usize>,
    expanded: HashSet<StateId>,
    limit_reached: bool,
}

/// Concurrent-safe state graph
pub struct StateGraph {
    inner: RwLock<GraphInner>,
    max_states: Limit,
    similarity_threshold: u32,
}

impl StateGraph {
    /// Creates an empty graph
    ///
    /// # Arguments
    ///
    /// * `max_states` - Upper bound on the number of states
    /// * `similarity_threshold` - Hamming distance under which perceptual
    ///   fingerprints are the same state (0 = exact match only)
    pub fn new(max_states: Limit, similarity_threshold: u32) -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            max_states,
            similarity_threshold,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a state or returns the existing one with the same fingerprint
    ///
    /// # Returns
    ///
    /// * `Ok((id, true))` - A new state was created
    /// * `Ok((id, false))` - The fingerprint (or a near-duplicate) was known
    /// * `Err(StateLimitReached)` - The state is new but `max-states` is reached
    pub fn add_state(
        &self,
        fingerprint: Fingerprint,
        observed: ObservedState,
    ) -> Result<(StateId, bool), StateLimitReached> {
        let mut inner = self.write();

        if let Some(existing) = Self::lookup(&inner, &fingerprint, self.similarity_threshold) {
            return Ok((existing, false));
        }

        let count = inner.graph.node_count() as u32;
        if let Limit::Bounded(limit) = self.max_states {
            if count >= limit {
                inner.limit_reached = true;
                return Err(StateLimitReached { limit });
            }
        }

        let id = StateId(count);
        let index = inner.graph.add_node(StateVertex {
            id,
            name: id.name(),
            fingerprint,
            url: observed.url,
            depth: observed.depth,
            discovered_at: Utc::now(),
            dom: observed.dom,
            screenshot: observed.screenshot,
        });
        debug_assert_eq!(StateId::from_index(index), id);

        inner.by_fingerprint.insert(fingerprint, id);
        if self.max_states.is_reached(count + 1) {
            inner.limit_reached = true;
        }

        tracing::debug!("New state {} ({})", id, fingerprint);
        Ok((id, true))
    }

    fn lookup(inner: &GraphInner, fingerprint: &Fingerprint, threshold: u32) -> Option<StateId> {
        if let Some(id) = inner.by_fingerprint.get(fingerprint) {
            return Some(*id);
        }
        if threshold == 0 {
            return None;
        }

        inner
            .by_fingerprint
            .iter()
            .filter(|(known, _)| known.is_similar(fingerprint, threshold))
            .filter_map(|(known, id)| known.distance(fingerprint).map(|d| (d, *id)))
            .min()
            .map(|(_, id)| id)
    }

    /// Finds the state a fingerprint belongs to without inserting
    pub fn find_state(&self, fingerprint: &Fingerprint) -> Option<StateId> {
        Self::lookup(&self.read(), fingerprint, self.similarity_threshold)
    }

    /// Records a transition
    ///
    /// Returns the recorded transition, or None (and records nothing) when an
    /// edge with the same action signature already leaves `from` or either
    /// state is unknown.
    pub fn add_edge(
        &self,
        from: StateId,
        to: StateId,
        action: Action,
        inputs: Vec<FilledInput>,
    ) -> Option<Transition> {
        let mut inner = self.write();
        let node_count = inner.graph.node_count();
        if from.0 as usize >= node_count || to.0 as usize >= node_count {
            return None;
        }

        let signature = action.signature();
        if !inner.edge_signatures.insert((from, signature.clone())) {
            return None;
        }
        inner.taken.entry(from).or_default().insert(signature);

        let transition = Transition {
            from,
            to,
            action,
            inputs,
            created_at: Utc::now(),
        };
        inner
            .graph
            .add_edge(from.index(), to.index(), transition.clone());
        Some(transition)
    }

    /// Claims the right to expand a state; true exactly once per state
    pub fn claim_expansion(&self, id: StateId) -> bool {
        self.write().expanded.insert(id)
    }

    /// Records that `count` candidates of `state` were put on the frontier
    pub fn register_candidates(&self, state: StateId, count: usize) {
        if count > 0 {
            *self.write().pending.entry(state).or_insert(0) += count;
        }
    }

    /// Records that a candidate reached a terminal outcome
    ///
    /// The signature joins the state's taken-set whatever the outcome, so the
    /// action is never offered again from that state.
    pub fn resolve_candidate(&self, state: StateId, signature: &str) {
        let mut inner = self.write();
        if let Some(pending) = inner.pending.get_mut(&state) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                inner.pending.remove(&state);
            }
        }
        inner
            .taken
            .entry(state)
            .or_default()
            .insert(signature.to_string());
    }

    /// Returns true if the action was already taken from the state
    pub fn is_taken(&self, state: StateId, signature: &str) -> bool {
        self.read()
            .taken
            .get(&state)
            .is_some_and(|set| set.contains(signature))
    }

    /// Snapshot of the taken-set of a state
    pub fn taken_signatures(&self, state: StateId) -> HashSet<String> {
        self.read().taken.get(&state).cloned().unwrap_or_default()
    }

    /// Returns true while any state has candidates that were not resolved
    pub fn has_unvisited_frontier(&self) -> bool {
        !self.read().pending.is_empty()
    }

    /// Returns true once `max-states` states exist or a new one was refused
    pub fn limit_reached(&self) -> bool {
        self.read().limit_reached
    }

    pub fn root(&self) -> Option<StateId> {
        (self.read().graph.node_count() > 0).then_some(StateId::ROOT)
    }

    /// The shortest recorded path from the root to `target`
    ///
    /// Returns an empty path for the root and None for unknown or unreachable
    /// states. Between two states joined by several edges the earliest
    /// recorded one is used.
    pub fn path_to(&self, target: StateId) -> Option<Vec<Transition>> {
        let inner = self.read();
        if target.0 as usize >= inner.graph.node_count() {
            return None;
        }

        let goal = target.index();
        let (_, nodes) = astar(
            &inner.graph,
            StateId::ROOT.index(),
            |n| n == goal,
            |_| 1u32,
            |_| 0u32,
        )?;

        nodes
            .windows(2)
            .map(|pair| {
                inner
                    .graph
                    .edges_connecting(pair[0], pair[1])
                    .min_by_key(|edge| edge.id())
                    .map(|edge| edge.weight().clone())
            })
            .collect()
    }

    /// Snapshots the graph for persistence and reports
    pub fn export(&self) -> GraphExport {
        GraphExport::from_view(self)
    }
}

impl GraphView for StateGraph {
    fn state_count(&self) -> usize {
        self.read().graph.node_count()
    }

    fn edge_count(&self) -> usize {
        self.read().graph.edge_count()
    }

    fn state(&self, id: StateId) -> Option<StateVertex> {
        self.read().graph.node_weight(id.index()).cloned()
    }

    fn states(&self) -> Vec<StateVertex> {
        self.read().graph.node_weights().cloned().collect()
    }

    fn transitions(&self) -> Vec<Transition> {
        let inner = self.read();
        let mut transitions: Vec<_> = inner.graph.edge_references().collect();
        transitions.sort_by_key(|edge| edge.id());
        transitions
            .into_iter()
            .map(|edge| edge.weight().clone())
            .collect()
    }
}

impl fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("StateGraph")
            .field("states", &inner.graph.node_count())
            .field("edges", &inner.graph.edge_count())
            .field("max_states", &self.max_states)
            .finish()
    }
}

use super::{GraphView, StateId};
use crate::candidates::ActionKind;
use crate::forms::FilledInput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serializable snapshot of a state graph
///
/// This is the form the graph takes outside the running crawl: it is what
/// storage persists, what `state-graph.json` contains, and what reports are
/// rendered from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub states: Vec<StateRecord>,
    pub transitions: Vec<TransitionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: StateId,
    pub name: String,
    /// Display form of the fingerprint (`dom:…` or `phash:…`)
    pub fingerprint: String,
    pub url: String,
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    pub dom_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: StateId,
    pub to: StateId,
    pub kind: ActionKind,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub text: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<FilledInput>,
    pub created_at: DateTime<Utc>,
}

impl GraphExport {
    /// Snapshots any graph view
    pub fn from_view(view: &dyn GraphView) -> Self {
        let states = view
            .states()
            .into_iter()
            .map(|vertex| StateRecord {
                id: vertex.id,
                name: vertex.name.clone(),
                fingerprint: vertex.fingerprint.to_string(),
                url: vertex.url.clone(),
                depth: vertex.depth,
                discovered_at: vertex.discovered_at,
                dom_size: vertex.dom.len(),
            })
            .collect();

        let transitions = view
            .transitions()
            .into_iter()
            .map(|t| TransitionRecord {
                from: t.from,
                to: t.to,
                kind: t.action.kind,
                signature: t.action.signature(),
                selector: t.action.selector,
                frame: t.action.frame,
                href: t.action.href,
                text: t.action.text,
                inputs: t.inputs,
                created_at: t.created_at,
            })
            .collect();

        Self {
            states,
            transitions,
        }
    }

    pub fn state(&self, id: StateId) -> Option<&StateRecord> {
        self.states.iter().find(|s| s.id == id)
    }

    /// Transitions leaving `id`, in recording order
    pub fn outgoing(&self, id: StateId) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter().filter(move |t| t.from == id)
    }

    /// Largest depth of any state
    pub fn max_depth(&self) -> u32 {
        self.states.iter().map(|s| s.depth).max().unwrap_or(0)
    }
}

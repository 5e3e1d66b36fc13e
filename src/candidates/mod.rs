//! Action candidate extraction
//!
//! Enumerates the interactive elements of a captured page that the crawler
//! may exercise, subject to the click rules of the configuration.
//!
//! # Components
//!
//! - `Action`: What is fired (click or hidden-anchor navigation) and where
//! - `ActionCandidate`: An action plus the element facts it was derived from
//! - `CandidateExtractor`: Applies inclusion and exclusion rules to a capture

mod extractor;
mod selector;

use crate::forms::FormField;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use extractor::CandidateExtractor;
pub use selector::unique_selector;

/// How an action is performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Click the element
    Click,
    /// Navigate to the element's `href` (hidden anchors cannot be clicked)
    FollowHref,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::FollowHref => "follow_href",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "click" => Some(Self::Click),
            "follow_href" => Some(Self::FollowHref),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Descriptor of an interaction that can be replayed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,

    /// Unique CSS selector of the target element within its document
    pub selector: String,

    /// Frame index path (`"0"`, `"1/0"`), None for the top document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,

    /// Resolved target of anchors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    /// Visible text of the element, for reports
    #[serde(default)]
    pub text: String,

    /// Fields of the form enclosing the element
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form_fields: Vec<FormField>,
}

impl Action {
    /// Identity of the action within one state
    ///
    /// Two actions with the same signature on the same state are the same
    /// action; only one of them is ever taken.
    pub fn signature(&self) -> String {
        let mut signature = format!(
            "{}:{}@{}",
            self.kind,
            self.selector,
            self.frame.as_deref().unwrap_or("top")
        );
        if self.kind == ActionKind::FollowHref {
            if let Some(href) = &self.href {
                signature.push_str("->");
                signature.push_str(href);
            }
        }
        signature
    }
}

/// An action together with the facts that made it eligible
#[derive(Debug, Clone)]
pub struct ActionCandidate {
    pub action: Action,
    /// Lowercase tag name
    pub tag: String,
    pub visible: bool,
    pub in_frame: bool,
    /// Matched the default clickable set rather than a `click` selector
    pub default_clickable: bool,
    /// Offered only because hidden anchors are crawled
    pub hidden_anchor: bool,
}

impl ActionCandidate {
    pub fn signature(&self) -> String {
        self.action.signature()
    }
}

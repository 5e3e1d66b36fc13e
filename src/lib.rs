//! Statecrawl: a state-exploring web application crawler
//!
//! This crate drives real browsers through a web application by clicking and
//! filling forms, reduces every page it reaches to a fingerprint, and records
//! the distinct states and the transitions between them as a state graph.

pub mod browser;
pub mod candidates;
pub mod config;
pub mod crawler;
pub mod fingerprint;
pub mod forms;
pub mod graph;
pub mod output;
pub mod plugins;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Browser session error: {0}")]
    SessionFatal(#[from] SessionFatalError),

    #[error("All browser sessions are unusable")]
    AllSessionsLost,

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid scheduler transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::SchedulerPhase,
        to: state::SchedulerPhase,
    },

    #[error("Output directory {path}: {source}")]
    OutputDirectory {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector in config: {0}")]
    InvalidSelector(String),

    #[error("Invalid limit '{0}': expected a non-negative integer or \"unlimited\"")]
    InvalidLimit(String),
}

/// Raised when a page cannot be reduced to a fingerprint
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Captured page at {url} is empty")]
    Empty { url: String },

    #[error("Captured page at {url} is unreadable: {message}")]
    Unreadable { url: String, message: String },
}

/// Raised when a single browser interaction fails
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Element not interactable: {selector}: {message}")]
    NotInteractable { selector: String, message: String },

    #[error("Navigation to {url} timed out")]
    NavigationTimeout { url: String },

    #[error("Frame {frame} is not available")]
    FrameUnavailable { frame: String },

    #[error("Replay to state {state} diverged")]
    ReplayDiverged { state: u32 },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Browser error: {0}")]
    Browser(String),
}

/// Raised when a browser session can no longer be used
#[derive(Debug, Clone, Error)]
pub enum SessionFatalError {
    #[error("Browser in session {slot} could not be started: {message}")]
    StartFailed { slot: usize, message: String },

    #[error("Browser in session {slot} crashed: {message}")]
    Crashed { slot: usize, message: String },
}

/// Error returned by browser drivers, split by whether the session survives
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Fatal(#[from] SessionFatalError),
}

impl BrowserError {
    /// Returns true if the session that produced this error must be torn down
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<BrowserError> for CrawlError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Dispatch(e) => Self::Dispatch(e),
            BrowserError::Fatal(e) => Self::SessionFatal(e),
        }
    }
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_crawl, Coordinator, RunOutcome};
pub use fingerprint::{Fingerprint, FingerprintStrategy};
pub use graph::{StateGraph, StateId};
pub use state::{CandidateState, SchedulerPhase};

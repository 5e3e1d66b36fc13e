//! Output traits and summary types
//!
//! This module defines the error type of the report writers, the summary
//! every report is rendered from, and the trait the writers implement.

use crate::graph::GraphExport;
use crate::storage::{FailedActionRecord, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No crawl runs found in database")]
    NoRuns,
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Summary of one crawl run
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    /// Run ID
    pub run_id: i64,

    /// When the run started
    pub started_at: String,

    /// When the run finished (if completed)
    pub finished_at: Option<String>,

    /// Duration in seconds
    pub duration_seconds: Option<u64>,

    /// Final run status
    pub status: String,

    /// Why the run ended
    pub termination: Option<String>,

    /// Configuration file hash
    pub config_hash: String,

    /// URL of the root state
    pub target_url: String,

    // State graph
    pub total_states: u64,
    pub total_transitions: u64,
    pub max_depth: u32,

    /// Number of states at each depth
    pub depth_breakdown: HashMap<u32, usize>,

    // Actions that produced no transition
    pub actions_failed: u64,
    pub actions_skipped: u64,
    pub failures: Vec<FailedActionRecord>,

    /// The persisted graph itself
    pub graph: GraphExport,
}

impl CrawlSummary {
    /// Creates a new empty crawl summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of actions that reached a terminal outcome
    pub fn total_actions(&self) -> u64 {
        self.total_transitions + self.actions_failed + self.actions_skipped
    }

    /// Returns the share of actions that produced a transition, in percent
    pub fn success_rate(&self) -> f64 {
        let total = self.total_actions();
        if total == 0 {
            return 0.0;
        }
        (self.total_transitions as f64 / total as f64) * 100.0
    }

    /// Returns the share of actions given up after retries, in percent
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_actions();
        if total == 0 {
            return 0.0;
        }
        (self.actions_failed as f64 / total as f64) * 100.0
    }
}

/// Trait for report writers
///
/// A writer renders a summary into one file of the output directory.
pub trait OutputHandler {
    /// File name the report is written to
    fn file_name(&self) -> &'static str;

    /// Renders the report
    ///
    /// # Arguments
    ///
    /// * `summary` - The run to report on
    ///
    /// # Returns
    ///
    /// The file contents
    fn render(&self, summary: &CrawlSummary) -> OutputResult<String>;

    /// Renders the report and writes it into `directory`
    ///
    /// # Returns
    ///
    /// The path of the written file
    fn write_to(&self, summary: &CrawlSummary, directory: &Path) -> OutputResult<PathBuf> {
        let path = directory.join(self.file_name());
        let contents = self.render(summary)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

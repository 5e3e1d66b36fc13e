//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::graph::GraphExport;
use crate::state::CandidateState;
use crate::storage::{FailedActionRecord, RunRecord, RunStatus};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the crawler and the
/// report commands.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    /// * `target_url` - URL of the root state
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str, target_url: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Records how a run ended, with a finish timestamp
    fn finish_run(&mut self, run_id: i64, status: RunStatus, termination: &str)
        -> StorageResult<()>;

    // ===== Graph Persistence =====

    /// Writes the states and transitions of a run
    ///
    /// The whole export is written in one transaction; an earlier graph of the
    /// same run is replaced.
    fn save_graph(&mut self, run_id: i64, graph: &GraphExport) -> StorageResult<()>;

    /// Reads back the graph of a run, states by id and transitions in
    /// recording order
    fn load_graph(&self, run_id: i64) -> StorageResult<GraphExport>;

    // ===== Action Outcomes =====

    /// Records an action that was given up or left the crawl scope
    fn record_failed_action(&mut self, run_id: i64, record: &FailedActionRecord)
        -> StorageResult<()>;

    /// Gets the failed and skipped actions of a run
    fn get_failed_actions(&self, run_id: i64) -> StorageResult<Vec<FailedActionRecord>>;

    // ===== Statistics =====

    /// Counts the states of a run
    fn count_states(&self, run_id: i64) -> StorageResult<u64>;

    /// Counts the transitions of a run
    fn count_transitions(&self, run_id: i64) -> StorageResult<u64>;

    /// Counts failed actions by outcome
    fn count_failed_actions(&self, run_id: i64) -> StorageResult<HashMap<CandidateState, u64>>;

    /// Gets state count breakdown by depth
    ///
    /// Returns a map of depth -> number of states at that depth
    fn get_depth_breakdown(&self, run_id: i64) -> StorageResult<HashMap<u32, usize>>;
}

//! Output module for generating crawl summaries and reports
//!
//! This module handles:
//! - Building a summary of a run from the crawl database
//! - Writing the markdown summary (`summary.md`)
//! - Exporting the state graph as JSON (`state-graph.json`)
//! - Loading and printing crawl statistics

mod json;
mod markdown;
pub mod stats;
mod traits;

pub use json::{JsonGraph, GRAPH_FILE};
pub use markdown::{
    format_markdown_summary, format_states_table, format_transitions_table,
    generate_markdown_summary, MarkdownSummary, SUMMARY_FILE,
};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use traits::{CrawlSummary, OutputError, OutputHandler, OutputResult};

use crate::state::CandidateState;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Generates a summary of one run from storage
///
/// # Arguments
///
/// * `storage` - The storage backend containing crawl data
/// * `run_id` - The run to summarize
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - Successfully generated summary
/// * `Err(OutputError)` - Failed to generate summary
pub fn generate_summary(storage: &dyn Storage, run_id: i64) -> OutputResult<CrawlSummary> {
    let run = storage.get_run(run_id)?;

    // Calculate duration if finished
    let duration_seconds = match (
        run.started_at.parse::<DateTime<Utc>>(),
        run.finished_at.as_deref().map(str::parse::<DateTime<Utc>>),
    ) {
        (Ok(started), Some(Ok(finished))) => {
            Some((finished - started).num_seconds().max(0) as u64)
        }
        _ => None,
    };

    let graph = storage.load_graph(run_id)?;
    let failures = storage.get_failed_actions(run_id)?;
    let outcomes = storage.count_failed_actions(run_id)?;

    Ok(CrawlSummary {
        run_id,
        duration_seconds,
        status: run.status.to_db_string().to_string(),
        termination: run.termination,
        config_hash: run.config_hash,
        target_url: run.target_url,
        started_at: run.started_at,
        finished_at: run.finished_at,
        total_states: storage.count_states(run_id)?,
        total_transitions: storage.count_transitions(run_id)?,
        max_depth: graph.max_depth(),
        depth_breakdown: storage.get_depth_breakdown(run_id)?,
        actions_failed: outcomes.get(&CandidateState::Failed).copied().unwrap_or(0),
        actions_skipped: outcomes.get(&CandidateState::Skipped).copied().unwrap_or(0),
        failures,
        graph,
    })
}

/// The report writers run at the end of every crawl
pub fn default_handlers() -> Vec<Box<dyn OutputHandler + Send + Sync>> {
    vec![Box::new(MarkdownSummary), Box::new(JsonGraph)]
}

/// Writes every report of a run into `directory`
///
/// # Returns
///
/// The paths of the written files
pub fn write_reports(
    storage: &dyn Storage,
    run_id: i64,
    directory: &Path,
) -> OutputResult<Vec<PathBuf>> {
    let summary = generate_summary(storage, run_id)?;

    let mut written = Vec::new();
    for handler in default_handlers() {
        let path = handler.write_to(&summary, directory)?;
        tracing::debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Regenerates the reports of the latest run in the database
///
/// # Returns
///
/// * `Ok(paths)` - The written files
/// * `Err(OutputError::NoRuns)` - The database holds no runs
pub fn export_latest(storage: &dyn Storage, directory: &Path) -> OutputResult<Vec<PathBuf>> {
    let run = storage.get_latest_run()?.ok_or(OutputError::NoRuns)?;
    write_reports(storage, run.id, directory)
}

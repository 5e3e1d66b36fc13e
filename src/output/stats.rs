//! Statistics generation from crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::state::CandidateState;
use crate::storage::{RunRecord, Storage};
use crate::CrawlError;
use std::collections::HashMap;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// The run the statistics belong to
    pub run: RunRecord,

    /// Number of distinct states discovered
    pub total_states: u64,

    /// Number of recorded transitions
    pub total_transitions: u64,

    /// Count of states by depth
    pub states_by_depth: HashMap<u32, usize>,

    /// Actions that produced no transition, by outcome
    pub actions_by_outcome: HashMap<CandidateState, u64>,
}

/// Loads statistics of the latest run from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(Some(CrawlStatistics))` - Successfully loaded statistics
/// * `Ok(None)` - The database holds no runs
/// * `Err(CrawlError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<Option<CrawlStatistics>, CrawlError> {
    let Some(run) = storage.get_latest_run()? else {
        return Ok(None);
    };

    Ok(Some(CrawlStatistics {
        total_states: storage.count_states(run.id)?,
        total_transitions: storage.count_transitions(run.id)?,
        states_by_depth: storage.get_depth_breakdown(run.id)?,
        actions_by_outcome: storage.count_failed_actions(run.id)?,
        run,
    }))
}

/// Prints statistics to stdout
///
/// # Arguments
///
/// * `stats` - The statistics to print
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Run {}:", stats.run.id);
    println!("  Target: {}", stats.run.target_url);
    println!("  Started: {}", stats.run.started_at);
    if let Some(finished) = &stats.run.finished_at {
        println!("  Finished: {}", finished);
    }
    println!("  Status: {}", stats.run.status.to_db_string());
    if let Some(termination) = &stats.run.termination {
        println!("  Termination: {}", termination);
    }
    println!();

    println!("State Graph:");
    println!("  States: {}", stats.total_states);
    println!("  Transitions: {}", stats.total_transitions);
    println!();

    if !stats.states_by_depth.is_empty() {
        println!("States by Depth:");
        let mut depths: Vec<_> = stats.states_by_depth.iter().collect();
        depths.sort_by_key(|(depth, _)| **depth);

        for (depth, count) in depths {
            let percentage = if stats.total_states > 0 {
                (*count as f64 / stats.total_states as f64) * 100.0
            } else {
                0.0
            };
            println!("  Depth {}: {} ({:.1}%)", depth, count, percentage);
        }
        println!();
    }

    if !stats.actions_by_outcome.is_empty() {
        println!("Actions Without Transition:");
        let mut outcomes: Vec<_> = stats.actions_by_outcome.iter().collect();
        outcomes.sort_by(|a, b| b.1.cmp(a.1));

        for (outcome, count) in outcomes {
            println!("  {}: {}", outcome, count);
        }
        println!();
    }

    let unproductive: u64 = stats.actions_by_outcome.values().sum();
    let total = stats.total_transitions + unproductive;
    let success_rate = if total > 0 {
        (stats.total_transitions as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} actions produced a transition)",
        success_rate, stats.total_transitions, total
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphExport, StateId, StateRecord};
    use crate::storage::{FailedActionRecord, SqliteStorage};
    use chrono::Utc;

    fn create_test_state(id: u32, depth: u32) -> StateRecord {
        StateRecord {
            id: StateId(id),
            name: StateId(id).name(),
            fingerprint: format!("dom:{:064x}", id),
            url: "https://app.test/".to_string(),
            depth,
            discovered_at: Utc::now(),
            dom_size: 100,
        }
    }

    #[test]
    fn test_load_statistics_empty_database() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(load_statistics(&storage).unwrap().is_none());
    }

    #[test]
    fn test_load_statistics_latest_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash", "https://app.test/").unwrap();

        let graph = GraphExport {
            states: vec![
                create_test_state(0, 0),
                create_test_state(1, 1),
                create_test_state(2, 1),
            ],
            transitions: vec![],
        };
        storage.save_graph(run_id, &graph).unwrap();
        storage
            .record_failed_action(
                run_id,
                &FailedActionRecord {
                    source: StateId(0),
                    signature: "click:#gone@top".to_string(),
                    selector: "#gone".to_string(),
                    outcome: CandidateState::Failed,
                    attempts: 3,
                    error: Some("Element not found: #gone".to_string()),
                },
            )
            .unwrap();

        let stats = load_statistics(&storage).unwrap().unwrap();
        assert_eq!(stats.run.id, run_id);
        assert_eq!(stats.total_states, 3);
        assert_eq!(stats.total_transitions, 0);
        assert_eq!(stats.states_by_depth.get(&1), Some(&2));
        assert_eq!(
            stats.actions_by_outcome.get(&CandidateState::Failed),
            Some(&1)
        );
    }
}

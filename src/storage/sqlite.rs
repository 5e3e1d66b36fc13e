//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::candidates::ActionKind;
use crate::graph::{GraphExport, StateId, StateRecord, TransitionRecord};
use crate::state::CandidateState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{FailedActionRecord, RunRecord, RunStatus};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn parse_timestamp(table: &'static str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            table,
            message: format!("bad timestamp '{}': {}", value, e),
        })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        target_url: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Failed),
        termination: row.get(6)?,
    })
}

const RUN_COLUMNS: &str =
    "id, started_at, finished_at, config_hash, target_url, status, termination";

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str, target_url: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, target_url, status) VALUES (?1, ?2, ?3, ?4)",
            params![now, config_hash, target_url, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        termination: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, termination = ?2, finished_at = ?3 WHERE id = ?4",
            params![status.to_db_string(), termination, now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Graph Persistence =====

    fn save_graph(&mut self, run_id: i64, graph: &GraphExport) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM transitions WHERE run_id = ?1", params![run_id])?;
        tx.execute("DELETE FROM states WHERE run_id = ?1", params![run_id])?;

        {
            let mut insert_state = tx.prepare(
                "INSERT INTO states (run_id, state_id, name, fingerprint, url, depth, discovered_at, dom_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for state in &graph.states {
                insert_state.execute(params![
                    run_id,
                    state.id.0,
                    state.name,
                    state.fingerprint,
                    state.url,
                    state.depth,
                    state.discovered_at.to_rfc3339(),
                    state.dom_size as i64,
                ])?;
            }

            let mut insert_transition = tx.prepare(
                "INSERT INTO transitions
                 (run_id, from_state, to_state, kind, selector, frame, href, text, signature, inputs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for t in &graph.transitions {
                let inputs = serde_json::to_string(&t.inputs)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                insert_transition.execute(params![
                    run_id,
                    t.from.0,
                    t.to.0,
                    t.kind.as_str(),
                    t.selector,
                    t.frame,
                    t.href,
                    t.text,
                    t.signature,
                    inputs,
                    t.created_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            "Saved graph of run {}: {} states, {} transitions",
            run_id,
            graph.states.len(),
            graph.transitions.len()
        );
        Ok(())
    }

    fn load_graph(&self, run_id: i64) -> StorageResult<GraphExport> {
        let mut stmt = self.conn.prepare(
            "SELECT state_id, name, fingerprint, url, depth, discovered_at, dom_size
             FROM states WHERE run_id = ?1 ORDER BY state_id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut states = Vec::with_capacity(rows.len());
        for (id, name, fingerprint, url, depth, discovered_at, dom_size) in rows {
            states.push(StateRecord {
                id: StateId(id),
                name,
                fingerprint,
                url,
                depth,
                discovered_at: parse_timestamp("states", &discovered_at)?,
                dom_size: dom_size.max(0) as usize,
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT from_state, to_state, kind, selector, frame, href, text, signature, inputs, created_at
             FROM transitions WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut transitions = Vec::with_capacity(rows.len());
        for (from, to, kind, selector, frame, href, text, signature, inputs, created_at) in rows {
            let kind = ActionKind::from_db_string(&kind).ok_or_else(|| StorageError::Corrupt {
                table: "transitions",
                message: format!("unknown action kind '{}'", kind),
            })?;
            let inputs = serde_json::from_str(&inputs)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            transitions.push(TransitionRecord {
                from: StateId(from),
                to: StateId(to),
                kind,
                selector,
                frame,
                href,
                text,
                signature,
                inputs,
                created_at: parse_timestamp("transitions", &created_at)?,
            });
        }

        Ok(GraphExport {
            states,
            transitions,
        })
    }

    // ===== Action Outcomes =====

    fn record_failed_action(
        &mut self,
        run_id: i64,
        record: &FailedActionRecord,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO failed_actions
             (run_id, source_state, signature, selector, outcome, attempts, error, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                record.source.0,
                record.signature,
                record.selector,
                record.outcome.to_db_string(),
                record.attempts,
                record.error,
                now
            ],
        )?;
        Ok(())
    }

    fn get_failed_actions(&self, run_id: i64) -> StorageResult<Vec<FailedActionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_state, signature, selector, outcome, attempts, error
             FROM failed_actions WHERE run_id = ?1 ORDER BY id",
        )?;

        let records = stmt
            .query_map(params![run_id], |row| {
                Ok(FailedActionRecord {
                    source: StateId(row.get(0)?),
                    signature: row.get(1)?,
                    selector: row.get(2)?,
                    outcome: CandidateState::from_db_string(&row.get::<_, String>(3)?)
                        .unwrap_or(CandidateState::Failed),
                    attempts: row.get(4)?,
                    error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ===== Statistics =====

    fn count_states(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM states WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_transitions(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM transitions WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_failed_actions(&self, run_id: i64) -> StorageResult<HashMap<CandidateState, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT outcome, COUNT(*) FROM failed_actions WHERE run_id = ?1 GROUP BY outcome",
        )?;

        let mut summary = HashMap::new();
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (outcome, count) = row?;
            if let Some(state) = CandidateState::from_db_string(&outcome) {
                summary.insert(state, count as u64);
            }
        }

        Ok(summary)
    }

    fn get_depth_breakdown(&self, run_id: i64) -> StorageResult<HashMap<u32, usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT depth, COUNT(*) FROM states WHERE run_id = ?1 GROUP BY depth ORDER BY depth",
        )?;

        let mut breakdown = HashMap::new();
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (depth, count) = row?;
            breakdown.insert(depth, count as usize);
        }

        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FieldValue, FilledInput};

    fn create_test_graph() -> GraphExport {
        let now = Utc::now();
        let state = |id: u32, depth: u32| StateRecord {
            id: StateId(id),
            name: StateId(id).name(),
            fingerprint: format!("phash:{:016x}", id),
            url: "http://localhost:8085/".to_string(),
            depth,
            discovered_at: now,
            dom_size: 120,
        };

        GraphExport {
            states: vec![state(0, 0), state(1, 1), state(2, 1)],
            transitions: vec![
                TransitionRecord {
                    from: StateId(0),
                    to: StateId(1),
                    kind: ActionKind::Click,
                    selector: "#login".to_string(),
                    frame: None,
                    href: None,
                    text: "Log in".to_string(),
                    signature: "click:#login@top".to_string(),
                    inputs: vec![FilledInput {
                        selector: "#email".to_string(),
                        value: FieldValue::Text("crawler@example.com".to_string()),
                    }],
                    created_at: now,
                },
                TransitionRecord {
                    from: StateId(0),
                    to: StateId(2),
                    kind: ActionKind::FollowHref,
                    selector: "#hidden".to_string(),
                    frame: Some("0".to_string()),
                    href: Some("http://localhost:8085/admin".to_string()),
                    text: String::new(),
                    signature: "follow_href:#hidden@0->http://localhost:8085/admin".to_string(),
                    inputs: Vec::new(),
                    created_at: now,
                },
            ],
        }
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_create_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("abc123", "http://localhost:8085/").unwrap();
        assert!(run_id > 0);

        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.target_url, "http://localhost:8085/");
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_missing_run() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.get_run(42),
            Err(StorageError::RunNotFound(42))
        ));
    }

    #[test]
    fn test_finish_run_and_latest() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.get_latest_run().unwrap().is_none());

        let first = storage.create_run("h", "http://a/").unwrap();
        let second = storage.create_run("h", "http://a/").unwrap();
        storage
            .finish_run(second, RunStatus::Completed, "frontier-exhausted")
            .unwrap();

        let latest = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.termination.as_deref(), Some("frontier-exhausted"));
        assert!(latest.finished_at.is_some());

        assert_eq!(storage.get_run(first).unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_save_and_load_graph() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("h", "http://localhost:8085/").unwrap();
        let graph = create_test_graph();

        storage.save_graph(run_id, &graph).unwrap();
        let loaded = storage.load_graph(run_id).unwrap();

        assert_eq!(loaded.states.len(), 3);
        assert_eq!(loaded.transitions.len(), 2);
        assert_eq!(loaded.transitions[0].inputs, graph.transitions[0].inputs);
        assert_eq!(loaded.transitions[1].frame.as_deref(), Some("0"));
        assert_eq!(loaded.transitions[1].kind, ActionKind::FollowHref);
        assert_eq!(loaded.states[2].fingerprint, graph.states[2].fingerprint);
    }

    #[test]
    fn test_save_graph_replaces_previous() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("h", "http://localhost:8085/").unwrap();
        let mut graph = create_test_graph();

        storage.save_graph(run_id, &graph).unwrap();
        graph.transitions.pop();
        storage.save_graph(run_id, &graph).unwrap();

        assert_eq!(storage.count_states(run_id).unwrap(), 3);
        assert_eq!(storage.count_transitions(run_id).unwrap(), 1);
    }

    #[test]
    fn test_graphs_are_per_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let first = storage.create_run("h", "http://a/").unwrap();
        let second = storage.create_run("h", "http://a/").unwrap();

        storage.save_graph(first, &create_test_graph()).unwrap();

        assert_eq!(storage.count_states(first).unwrap(), 3);
        assert_eq!(storage.count_states(second).unwrap(), 0);
    }

    #[test]
    fn test_failed_actions() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("h", "http://a/").unwrap();

        let failed = FailedActionRecord {
            source: StateId(0),
            signature: "click:#broken@top".to_string(),
            selector: "#broken".to_string(),
            outcome: CandidateState::Failed,
            attempts: 3,
            error: Some("Element not found: #broken".to_string()),
        };
        let skipped = FailedActionRecord {
            source: StateId(1),
            signature: "click:#external@top".to_string(),
            selector: "#external".to_string(),
            outcome: CandidateState::Skipped,
            attempts: 1,
            error: None,
        };
        storage.record_failed_action(run_id, &failed).unwrap();
        storage.record_failed_action(run_id, &skipped).unwrap();

        let records = storage.get_failed_actions(run_id).unwrap();
        assert_eq!(records, vec![failed, skipped]);

        let counts = storage.count_failed_actions(run_id).unwrap();
        assert_eq!(counts.get(&CandidateState::Failed), Some(&1));
        assert_eq!(counts.get(&CandidateState::Skipped), Some(&1));
    }

    #[test]
    fn test_depth_breakdown() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("h", "http://a/").unwrap();
        storage.save_graph(run_id, &create_test_graph()).unwrap();

        let breakdown = storage.get_depth_breakdown(run_id).unwrap();
        assert_eq!(breakdown.get(&0), Some(&1));
        assert_eq!(breakdown.get(&1), Some(&2));
    }
}

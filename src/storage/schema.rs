//! Database schema definitions
//!
//! This module contains the SQL schema of the crawl database. One database
//! holds any number of runs; every row of the other tables belongs to a run.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    target_url TEXT NOT NULL,
    status TEXT NOT NULL,
    termination TEXT
);

-- Discovered states
CREATE TABLE IF NOT EXISTS states (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    state_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    discovered_at TEXT NOT NULL,
    dom_size INTEGER NOT NULL,
    PRIMARY KEY (run_id, state_id)
);

CREATE INDEX IF NOT EXISTS idx_states_fingerprint ON states(run_id, fingerprint);

-- Recorded transitions, at most one per (source state, action signature)
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    from_state INTEGER NOT NULL,
    to_state INTEGER NOT NULL,
    kind TEXT NOT NULL,
    selector TEXT NOT NULL,
    frame TEXT,
    href TEXT,
    text TEXT NOT NULL,
    signature TEXT NOT NULL,
    inputs TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(run_id, from_state, signature)
);

CREATE INDEX IF NOT EXISTS idx_transitions_from ON transitions(run_id, from_state);
CREATE INDEX IF NOT EXISTS idx_transitions_to ON transitions(run_id, to_state);

-- Actions that never produced a transition
CREATE TABLE IF NOT EXISTS failed_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    source_state INTEGER NOT NULL,
    signature TEXT NOT NULL,
    selector TEXT NOT NULL,
    outcome TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    error TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_actions_run ON failed_actions(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        let result = initialize_schema(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["runs", "states", "transitions", "failed_actions"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}

//! `SQLite`-backed implementation of [`StateStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety; `commit_group`
//! wraps the offset and state upserts in one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use transporter_types::{Namespace, RunStats, RunStatus, State, SyncPhase, WriterId};

use crate::backend::StateStore;
use crate::error::{StateError, StateResult};

/// Idempotent DDL for the state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS writer_offsets (
    writer TEXT PRIMARY KEY,
    offset INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS reader_states (
    namespace TEXT PRIMARY KEY,
    identifier TEXT,
    timestamp INTEGER NOT NULL,
    phase TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_read INTEGER DEFAULT 0,
    records_committed INTEGER DEFAULT 0,
    records_dropped INTEGER DEFAULT 0,
    error_message TEXT
);
";

const UPSERT_STATE: &str = "INSERT INTO reader_states (namespace, identifier, timestamp, phase, updated_at) \
     VALUES (?1, ?2, ?3, ?4, datetime('now')) \
     ON CONFLICT(namespace) DO UPDATE SET \
       identifier = excluded.identifier, \
       timestamp = excluded.timestamp, \
       phase = excluded.phase, \
       updated_at = excluded.updated_at \
     WHERE excluded.timestamp > reader_states.timestamp";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateStore::open`] for file-backed persistence or
/// [`SqliteStateStore::in_memory`] for tests.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create the state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created, or
    /// [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if initialization fails.
    pub fn in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> StateResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    #[allow(clippy::cast_sign_loss)]
    fn row_to_state(
        namespace: String,
        identifier: Option<String>,
        timestamp: i64,
        phase: String,
    ) -> State {
        State {
            identifier,
            timestamp: timestamp as u64,
            namespace: Namespace::new(namespace),
            phase: SyncPhase::parse(&phase).unwrap_or(SyncPhase::Copy),
        }
    }

    #[cfg(test)]
    fn get_run_row(&self, run_id: i64) -> StateResult<(String, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        Ok(conn.query_row(
            "SELECT status, records_read, finished_at, error_message \
             FROM pipeline_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?)
    }
}

impl StateStore for SqliteStateStore {
    fn get_offset(&self, writer: &WriterId) -> StateResult<Option<u64>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT offset FROM writer_offsets WHERE writer = ?1",
            [writer.as_str()],
            |row| row.get::<_, i64>(0),
        );
        match result {
            #[allow(clippy::cast_sign_loss)]
            Ok(offset) => Ok(Some(offset as u64)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::Sqlite(e)),
        }
    }

    fn all_offsets(&self) -> StateResult<Vec<(WriterId, u64)>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT writer, offset FROM writer_offsets ORDER BY writer")?;
        let rows = stmt.query_map([], |row| {
            let writer: String = row.get(0)?;
            let offset: i64 = row.get(1)?;
            Ok((writer, offset))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (writer, offset) = row?;
            #[allow(clippy::cast_sign_loss)]
            out.push((WriterId::new(writer), offset as u64));
        }
        Ok(out)
    }

    fn get_state(&self, namespace: &Namespace) -> StateResult<Option<State>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT namespace, identifier, timestamp, phase \
             FROM reader_states WHERE namespace = ?1",
            [namespace.as_str()],
            |row| {
                Ok(Self::row_to_state(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            },
        );
        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::Sqlite(e)),
        }
    }

    fn all_states(&self) -> StateResult<Vec<State>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT namespace, identifier, timestamp, phase \
             FROM reader_states ORDER BY namespace",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Self::row_to_state(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn put_state(&self, state: &State) -> StateResult<bool> {
        let conn = self.lock_conn()?;
        let affected = conn.execute(
            UPSERT_STATE,
            rusqlite::params![
                state.namespace.as_str(),
                state.identifier,
                state.timestamp as i64,
                state.phase.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn commit_group(&self, writer: &WriterId, offset: u64, states: &[State]) -> StateResult<()> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO writer_offsets (writer, offset, updated_at) \
             VALUES (?1, ?2, datetime('now')) \
             ON CONFLICT(writer) DO UPDATE SET \
               offset = excluded.offset, updated_at = excluded.updated_at \
             WHERE excluded.offset > writer_offsets.offset",
            rusqlite::params![writer.as_str(), offset as i64],
        )?;
        {
            let mut stmt = tx.prepare(UPSERT_STATE)?;
            for state in states {
                stmt.execute(rusqlite::params![
                    state.namespace.as_str(),
                    state.identifier,
                    state.timestamp as i64,
                    state.phase.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn start_run(&self, pipeline: &str) -> StateResult<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline, status) VALUES (?1, ?2)",
            rusqlite::params![pipeline, RunStatus::Running.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> StateResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = datetime('now'), \
             records_read = ?2, records_committed = ?3, records_dropped = ?4, \
             error_message = ?5 WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                stats.records_read as i64,
                stats.records_committed as i64,
                stats.records_dropped as i64,
                stats.error_message,
                run_id,
            ],
        )?;
        Ok(())
    }
}

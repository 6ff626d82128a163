use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use niah_core::{NiahError, NiahResult, ResultRecord, ResultStore, TrialKey};

use crate::schema::init_db;

/// One row per trial in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &Path) -> NiahResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NiahError::Storage(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| NiahError::Storage(format!("cannot open database: {e}")))?;
        // Several sweep processes may share one database.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| NiahError::Storage(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> NiahResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NiahError::Storage(format!("cannot open in-memory db: {e}")))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> NiahResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NiahError::Storage("connection lock poisoned".into()))
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ResultRecord> {
    Ok(ResultRecord {
        model: row.get(0)?,
        context_length: row.get::<_, i64>(1)? as usize,
        depth_percent: row.get(2)?,
        version: row.get(3)?,
        needle: row.get(4)?,
        model_response: row.get(5)?,
        score: row.get(6)?,
        test_duration_seconds: row.get(7)?,
        test_timestamp_utc: row.get(8)?,
    })
}

impl ResultStore for SqliteStore {
    fn exists(&self, key: &TrialKey) -> NiahResult<bool> {
        self.conn()?
            .query_row(
                "SELECT COUNT(*) > 0 FROM results
                 WHERE model = ?1 AND context_length = ?2 AND depth_percent = ?3 AND version = ?4",
                params![
                    key.model,
                    key.context_length as i64,
                    key.depth_percent,
                    key.version
                ],
                |row| row.get(0),
            )
            .map_err(|e| NiahError::Storage(e.to_string()))
    }

    fn put(&self, record: &ResultRecord) -> NiahResult<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO results (model, context_length, depth_percent, version,
                 needle, model_response, score, test_duration_seconds, test_timestamp_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.model,
                    record.context_length as i64,
                    record.depth_percent,
                    record.version,
                    record.needle,
                    record.model_response,
                    record.score,
                    record.test_duration_seconds,
                    record.test_timestamp_utc,
                ],
            )
            .map_err(|e| NiahError::Storage(e.to_string()))?;
        Ok(())
    }

    fn records(&self, model: &str) -> NiahResult<Vec<ResultRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT model, context_length, depth_percent, version, needle, model_response,
                 score, test_duration_seconds, test_timestamp_utc
                 FROM results WHERE model = ?1 ORDER BY context_length, depth_percent",
            )
            .map_err(|e| NiahError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![model], row_to_record)
            .map_err(|e| NiahError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| NiahError::Storage(e.to_string()))
    }
}

use rusqlite::Connection;

use niah_core::NiahError;

pub fn init_db(conn: &Connection) -> Result<(), NiahError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS results (
            model TEXT NOT NULL,
            context_length INTEGER NOT NULL,
            depth_percent REAL NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,

            needle TEXT NOT NULL,
            model_response TEXT NOT NULL,
            score INTEGER NOT NULL,
            test_duration_seconds REAL NOT NULL,
            test_timestamp_utc TEXT NOT NULL,

            UNIQUE(model, context_length, depth_percent, version)
        );

        CREATE INDEX IF NOT EXISTS idx_results_model ON results(model);
        ",
    )
    .map_err(|e| NiahError::Storage(e.to_string()))
}

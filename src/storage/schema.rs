//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'GET',
            headers_json TEXT NOT NULL DEFAULT '{}',
            body_template TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY,
            target_id INTEGER NOT NULL REFERENCES targets(id),
            kind TEXT NOT NULL,
            config_json TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            next_run_at TEXT NOT NULL,
            run_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- No foreign key on schedule_id: runs outlive their schedule.
        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY,
            execution_id TEXT NOT NULL UNIQUE,
            schedule_id INTEGER NOT NULL,
            executed_at TEXT NOT NULL,
            outcome TEXT NOT NULL,
            status_code INTEGER,
            latency_ms INTEGER NOT NULL,
            response_body TEXT,
            error_type TEXT,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules(status, next_run_at);
        CREATE INDEX IF NOT EXISTS idx_schedules_target ON schedules(target_id);
        CREATE INDEX IF NOT EXISTS idx_runs_schedule ON runs(schedule_id, executed_at);
        CREATE INDEX IF NOT EXISTS idx_runs_executed ON runs(executed_at);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

//! SQLite storage layer -- schema, the scheduling store seam, and queries.

pub mod schema;
mod store;

pub use store::{SqliteStore, TargetDeletion};

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::StoreError;
use crate::model::{ExecutionResult, RunId, Schedule, ScheduleId, SchedulingState, Target};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: impl AsRef<Path>) -> Result<Pool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width UTC timestamp so that text order matches time order.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db_time(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// A due schedule together with the target snapshot it fires against.
#[derive(Debug, Clone)]
pub struct DueJob {
    pub schedule: Schedule,
    pub target: Target,
}

/// What the scheduling core needs from persistence.
///
/// `advance` is a compare-and-swap: it applies `next` only if the stored
/// scheduling fields still equal `expected`, and reports whether it did.
/// `at` is the caller's clock reading, stamped as the row's `updated_at`.
pub trait JobStore: Send + Sync {
    /// ACTIVE schedules with `next_run_at <= now`, ordered by
    /// `(next_run_at, id)`.
    fn due_jobs(&self, now: DateTime<Utc>) -> std::result::Result<Vec<DueJob>, StoreError>;

    fn advance(
        &self,
        id: ScheduleId,
        expected: &SchedulingState,
        next: &SchedulingState,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;

    /// Append a run. Returns `None` if this execution was already recorded.
    fn insert_run(&self, result: &ExecutionResult) -> std::result::Result<Option<RunId>, StoreError>;
}

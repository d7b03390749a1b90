//! SQLite-backed implementation of [`JobStore`] plus the control-surface and
//! history queries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{from_db_time, to_db_time, DueJob, JobStore, Pool};
use crate::error::StoreError;
use crate::model::{
    ErrorType, ExecutionResult, NewTarget, Run, RunId, RunOutcome, RunQuery, RunStats, Schedule,
    ScheduleConfig, ScheduleId, ScheduleStatus, SchedulingState, Target, TargetId,
};

const DEFAULT_RUN_LIMIT: u32 = 100;

const SCHEDULE_COLUMNS: &str =
    "s.id, s.target_id, s.config_json, s.status, s.next_run_at, s.run_count, s.created_at";
const TARGET_COLUMNS: &str =
    "t.id, t.url, t.method, t.headers_json, t.body_template, t.created_at";
const RUN_COLUMNS: &str = "id, execution_id, schedule_id, executed_at, outcome, status_code, \
     latency_ms, response_body, error_type, error_message";

/// Result of a target deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDeletion {
    Deleted,
    NotFound,
    /// Still referenced by this many schedules; nothing was deleted.
    InUse(i64),
}

/// Persists targets, schedules and runs in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    // --- targets -----------------------------------------------------------

    pub fn insert_target(
        &self,
        new: &NewTarget,
        created_at: DateTime<Utc>,
    ) -> Result<Target, StoreError> {
        let conn = self.pool.get()?;
        let headers_json = serde_json::to_string(&new.headers)?;
        conn.execute(
            "INSERT INTO targets (url, method, headers_json, body_template, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.url,
                new.method,
                headers_json,
                new.body_template,
                to_db_time(created_at)
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(target_id = id, url = %new.url, "target inserted");

        Ok(Target {
            id,
            url: new.url.clone(),
            method: new.method.clone(),
            headers: new.headers.clone(),
            body_template: new.body_template.clone(),
            created_at,
        })
    }

    pub fn target(&self, id: TargetId) -> Result<Option<Target>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM targets t WHERE t.id = ?1"),
                [id],
                |row| TargetRow::read(row, 0),
            )
            .optional()?;
        row.map(TargetRow::into_target).transpose()
    }

    pub fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("SELECT {TARGET_COLUMNS} FROM targets t ORDER BY t.id"))?;
        let rows = stmt
            .query_map([], |row| TargetRow::read(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TargetRow::into_target).collect()
    }

    /// Delete a target unless some schedule still references it. The check
    /// and the delete share one transaction.
    pub fn delete_target(&self, id: TargetId) -> Result<TargetDeletion, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let references: i64 = tx.query_row(
            "SELECT COUNT(*) FROM schedules WHERE target_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if references > 0 {
            return Ok(TargetDeletion::InUse(references));
        }

        let changed = tx.execute("DELETE FROM targets WHERE id = ?1", [id])?;
        tx.commit()?;

        Ok(if changed == 0 {
            TargetDeletion::NotFound
        } else {
            TargetDeletion::Deleted
        })
    }

    // --- schedules ---------------------------------------------------------

    pub fn insert_schedule(
        &self,
        target_id: TargetId,
        config: &ScheduleConfig,
        next_run_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<Schedule, StoreError> {
        let conn = self.pool.get()?;
        let config_json = serde_json::to_string(config)?;
        let created = to_db_time(created_at);
        conn.execute(
            "INSERT INTO schedules
             (target_id, kind, config_json, status, next_run_at, run_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                target_id,
                config.kind(),
                config_json,
                ScheduleStatus::Active.as_str(),
                to_db_time(next_run_at),
                created
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(schedule_id = id, target_id, kind = config.kind(), "schedule inserted");

        Ok(Schedule {
            id,
            target_id,
            config: config.clone(),
            status: ScheduleStatus::Active,
            next_run_at,
            run_count: 0,
            created_at,
        })
    }

    pub fn schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules s WHERE s.id = ?1"),
                [id],
                |row| ScheduleRow::read(row, 0),
            )
            .optional()?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    pub fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules s ORDER BY s.id"))?;
        let rows = stmt
            .query_map([], |row| ScheduleRow::read(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    /// Set `status = to` if the current status is one of `from`. Scheduling
    /// time and run count are left untouched; `updated_at` becomes `at`.
    pub fn transition_status(
        &self,
        id: ScheduleId,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.pool.get()?;
        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE schedules SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status IN ({placeholders})"
        );

        let mut args: Vec<Value> = vec![
            Value::Text(to.as_str().to_string()),
            Value::Text(to_db_time(at)),
            Value::Integer(id),
        ];
        args.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));

        let changed = conn.execute(&sql, params_from_iter(args))?;
        Ok(changed == 1)
    }

    /// Delete a schedule. Its runs are kept.
    pub fn delete_schedule(&self, id: ScheduleId) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        Ok(changed == 1)
    }

    // --- runs --------------------------------------------------------------

    /// Run history, newest first.
    pub fn runs(&self, query: &RunQuery) -> Result<Vec<Run>, StoreError> {
        let conn = self.pool.get()?;
        let mut sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();

        if let Some(schedule_id) = query.schedule_id {
            sql.push_str(" AND schedule_id = ?");
            args.push(Value::Integer(schedule_id));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND executed_at >= ?");
            args.push(Value::Text(to_db_time(since)));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND executed_at <= ?");
            args.push(Value::Text(to_db_time(until)));
        }
        sql.push_str(" ORDER BY executed_at DESC, id DESC LIMIT ?");
        args.push(Value::Integer(i64::from(
            query.limit.unwrap_or(DEFAULT_RUN_LIMIT),
        )));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), RunRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub fn run(&self, id: RunId) -> Result<Option<Run>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                [id],
                RunRow::read,
            )
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn run_stats(&self) -> Result<RunStats, StoreError> {
        let conn = self.pool.get()?;
        let (total, success, failure, avg): (i64, i64, i64, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(outcome = 'SUCCESS'), 0),
                    COALESCE(SUM(outcome = 'FAILURE'), 0),
                    COALESCE(AVG(latency_ms), 0.0)
             FROM runs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT error_type, COUNT(*) FROM runs
             WHERE error_type IS NOT NULL GROUP BY error_type",
        )?;
        let grouped = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut failures_by_type = BTreeMap::new();
        for (raw, count) in grouped {
            match raw.parse::<ErrorType>() {
                Ok(ty) => {
                    failures_by_type.insert(ty, count.max(0) as u64);
                }
                Err(e) => warn!(error = %e, "skipping unknown error_type in run stats"),
            }
        }

        Ok(RunStats {
            total_runs: total.max(0) as u64,
            success_runs: success.max(0) as u64,
            failed_runs: failure.max(0) as u64,
            avg_latency_ms: (avg * 100.0).round() / 100.0,
            failures_by_type,
        })
    }
}

impl JobStore for SqliteStore {
    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<DueJob>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SCHEDULE_COLUMNS}, {TARGET_COLUMNS}
             FROM schedules s JOIN targets t ON t.id = s.target_id
             WHERE s.status = ?1 AND s.next_run_at <= ?2
             ORDER BY s.next_run_at, s.id"
        ))?;
        let rows = stmt
            .query_map(
                params![ScheduleStatus::Active.as_str(), to_db_time(now)],
                |row| Ok((ScheduleRow::read(row, 0)?, TargetRow::read(row, 7)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut due = Vec::with_capacity(rows.len());
        for (schedule_row, target_row) in rows {
            let schedule_id = schedule_row.id;
            let job = schedule_row
                .into_schedule()
                .and_then(|schedule| Ok(DueJob { schedule, target: target_row.into_target()? }));
            match job {
                Ok(job) => due.push(job),
                Err(e) => warn!(schedule_id, error = %e, "skipping unreadable due schedule"),
            }
        }
        Ok(due)
    }

    fn advance(
        &self,
        id: ScheduleId,
        expected: &SchedulingState,
        next: &SchedulingState,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE schedules
             SET next_run_at = ?1, status = ?2, run_count = ?3, updated_at = ?4
             WHERE id = ?5 AND status = ?6 AND next_run_at = ?7 AND run_count = ?8",
            params![
                to_db_time(next.next_run_at),
                next.status.as_str(),
                next.run_count,
                to_db_time(at),
                id,
                expected.status.as_str(),
                to_db_time(expected.next_run_at),
                expected.run_count
            ],
        )?;
        Ok(changed == 1)
    }

    fn insert_run(&self, result: &ExecutionResult) -> Result<Option<RunId>, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO runs
             (execution_id, schedule_id, executed_at, outcome, status_code, latency_ms,
              response_body, error_type, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.execution_id.to_string(),
                result.schedule_id,
                to_db_time(result.executed_at),
                result.outcome.as_str(),
                result.status_code,
                i64::try_from(result.latency_ms).unwrap_or(i64::MAX),
                result.response_body,
                result.error_type.map(|t| t.as_str()),
                result.error_message
            ],
        )?;
        Ok((changed == 1).then(|| conn.last_insert_rowid()))
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn corrupt(entity: &'static str, id: i64, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        entity,
        id,
        reason: reason.to_string(),
    }
}

struct TargetRow {
    id: i64,
    url: String,
    method: String,
    headers_json: String,
    body_template: Option<String>,
    created_at: String,
}

impl TargetRow {
    fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            url: row.get(offset + 1)?,
            method: row.get(offset + 2)?,
            headers_json: row.get(offset + 3)?,
            body_template: row.get(offset + 4)?,
            created_at: row.get(offset + 5)?,
        })
    }

    fn into_target(self) -> Result<Target, StoreError> {
        let headers = serde_json::from_str(&self.headers_json)
            .map_err(|e| corrupt("target", self.id, e))?;
        let created_at = from_db_time(&self.created_at).map_err(|e| corrupt("target", self.id, e))?;
        Ok(Target {
            id: self.id,
            url: self.url,
            method: self.method,
            headers,
            body_template: self.body_template,
            created_at,
        })
    }
}

struct ScheduleRow {
    id: i64,
    target_id: i64,
    config_json: String,
    status: String,
    next_run_at: String,
    run_count: i64,
    created_at: String,
}

impl ScheduleRow {
    fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            target_id: row.get(offset + 1)?,
            config_json: row.get(offset + 2)?,
            status: row.get(offset + 3)?,
            next_run_at: row.get(offset + 4)?,
            run_count: row.get(offset + 5)?,
            created_at: row.get(offset + 6)?,
        })
    }

    fn into_schedule(self) -> Result<Schedule, StoreError> {
        let id = self.id;
        Ok(Schedule {
            id,
            target_id: self.target_id,
            config: serde_json::from_str(&self.config_json).map_err(|e| corrupt("schedule", id, e))?,
            status: self
                .status
                .parse::<ScheduleStatus>()
                .map_err(|e| corrupt("schedule", id, e))?,
            next_run_at: from_db_time(&self.next_run_at).map_err(|e| corrupt("schedule", id, e))?,
            run_count: u32::try_from(self.run_count).map_err(|e| corrupt("schedule", id, e))?,
            created_at: from_db_time(&self.created_at).map_err(|e| corrupt("schedule", id, e))?,
        })
    }
}

struct RunRow {
    id: i64,
    execution_id: String,
    schedule_id: i64,
    executed_at: String,
    outcome: String,
    status_code: Option<i64>,
    latency_ms: i64,
    response_body: Option<String>,
    error_type: Option<String>,
    error_message: Option<String>,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            execution_id: row.get(1)?,
            schedule_id: row.get(2)?,
            executed_at: row.get(3)?,
            outcome: row.get(4)?,
            status_code: row.get(5)?,
            latency_ms: row.get(6)?,
            response_body: row.get(7)?,
            error_type: row.get(8)?,
            error_message: row.get(9)?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        let id = self.id;
        let status_code = self
            .status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|e| corrupt("run", id, e))?;
        let error_type = self
            .error_type
            .as_deref()
            .map(str::parse::<ErrorType>)
            .transpose()
            .map_err(|e| corrupt("run", id, e))?;
        Ok(Run {
            id,
            execution_id: Uuid::parse_str(&self.execution_id).map_err(|e| corrupt("run", id, e))?,
            schedule_id: self.schedule_id,
            executed_at: from_db_time(&self.executed_at).map_err(|e| corrupt("run", id, e))?,
            outcome: self
                .outcome
                .parse::<RunOutcome>()
                .map_err(|e| corrupt("run", id, e))?,
            status_code,
            latency_ms: u64::try_from(self.latency_ms).unwrap_or(0),
            response_body: self.response_body,
            error_type,
            error_message: self.error_message,
        })
    }
}

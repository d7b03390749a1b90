//! Domain records shared by the scheduler, dispatcher, observers and store.
//!
//! Targets are immutable once created. A schedule's scheduling fields
//! (`next_run_at`, `status`, `run_count`) change only through the scheduler
//! engine's advance or an explicit pause/resume. Runs are append-only.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TargetId = i64;
pub type ScheduleId = i64;
pub type RunId = i64;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// An HTTP endpoint that schedules fire against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body_template: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl NewTarget {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body_template: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Type-specific schedule configuration, tagged by schedule type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ScheduleConfig {
    /// Fire every `interval_seconds`, indefinitely.
    Interval { interval_seconds: u64 },

    /// Fire every `interval_seconds` inside `[start_time, end_time]`,
    /// optionally at most `max_runs` times.
    Window {
        interval_seconds: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_runs: Option<u32>,
    },
}

impl ScheduleConfig {
    /// The type tag persisted alongside the configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleConfig::Interval { .. } => "INTERVAL",
            ScheduleConfig::Window { .. } => "WINDOW",
        }
    }

    pub fn interval_seconds(&self) -> u64 {
        match self {
            ScheduleConfig::Interval { interval_seconds }
            | ScheduleConfig::Window { interval_seconds, .. } => *interval_seconds,
        }
    }
}

/// Schedule configuration as submitted by a caller. A window's start time
/// may be omitted, in which case it opens at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ScheduleSpec {
    Interval {
        interval_seconds: u64,
    },
    Window {
        interval_seconds: u64,
        #[serde(default)]
        start_time: Option<DateTime<Utc>>,
        end_time: DateTime<Utc>,
        #[serde(default)]
        max_runs: Option<u32>,
    },
}

impl ScheduleSpec {
    /// Pin relative fields against the creation instant.
    pub fn resolve(self, now: DateTime<Utc>) -> ScheduleConfig {
        match self {
            ScheduleSpec::Interval { interval_seconds } => {
                ScheduleConfig::Interval { interval_seconds }
            }
            ScheduleSpec::Window {
                interval_seconds,
                start_time,
                end_time,
                max_runs,
            } => ScheduleConfig::Window {
                interval_seconds,
                start_time: start_time.unwrap_or(now),
                end_time,
                max_runs,
            },
        }
    }
}

/// Input for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub target_id: TargetId,
    pub schedule: ScheduleSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Paused => "PAUSED",
            ScheduleStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ScheduleStatus::Active),
            "PAUSED" => Ok(ScheduleStatus::Paused),
            "COMPLETED" => Ok(ScheduleStatus::Completed),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

/// The fields the scheduler engine reads and writes atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingState {
    pub next_run_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub run_count: u32,
}

/// A persisted schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub target_id: TargetId,
    pub config: ScheduleConfig,
    pub status: ScheduleStatus,
    pub next_run_at: DateTime<Utc>,
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn scheduling_state(&self) -> SchedulingState {
        SchedulingState {
            next_run_at: self.next_run_at,
            status: self.status,
            run_count: self.run_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Executions and runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunOutcome {
    Success,
    Failure,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::Failure => "FAILURE",
        }
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(RunOutcome::Success),
            "FAILURE" => Ok(RunOutcome::Failure),
            other => Err(format!("unknown run outcome: {other}")),
        }
    }
}

/// Transport failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Timeout,
    DnsError,
    ConnectionRefused,
    Other,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::DnsError => "DNS_ERROR",
            ErrorType::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorType::Other => "OTHER",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TIMEOUT" => Ok(ErrorType::Timeout),
            "DNS_ERROR" => Ok(ErrorType::DnsError),
            "CONNECTION_REFUSED" => Ok(ErrorType::ConnectionRefused),
            "OTHER" => Ok(ErrorType::Other),
            other => Err(format!("unknown error type: {other}")),
        }
    }
}

/// A snapshot of one firing, handed from the engine to the dispatcher.
#[derive(Debug, Clone)]
pub struct Execution {
    pub execution_id: Uuid,
    pub schedule: Schedule,
    pub target: Target,
    /// The nominal `next_run_at` this firing satisfies.
    pub scheduled_for: DateTime<Utc>,
}

impl Execution {
    pub fn new(schedule: Schedule, target: Target) -> Self {
        let scheduled_for = schedule.next_run_at;
        Self {
            execution_id: Uuid::new_v4(),
            schedule,
            target,
            scheduled_for,
        }
    }
}

/// Normalized outcome of one execution. Every dispatched execution yields
/// exactly one of these, whatever happened on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub schedule_id: ScheduleId,
    pub executed_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub response_body: Option<String>,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// A completed HTTP exchange. Status codes of 400 and above are failures
    /// without a transport error class.
    pub fn response(
        execution: &Execution,
        executed_at: DateTime<Utc>,
        status_code: u16,
        latency_ms: u64,
        response_body: Option<String>,
    ) -> Self {
        let outcome = if status_code < 400 {
            RunOutcome::Success
        } else {
            RunOutcome::Failure
        };
        Self {
            execution_id: execution.execution_id,
            schedule_id: execution.schedule.id,
            executed_at,
            outcome,
            status_code: Some(status_code),
            latency_ms,
            response_body,
            error_type: None,
            error_message: None,
        }
    }

    /// A transport-level failure.
    pub fn transport_failure(
        execution: &Execution,
        executed_at: DateTime<Utc>,
        latency_ms: u64,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution.execution_id,
            schedule_id: execution.schedule.id,
            executed_at,
            outcome: RunOutcome::Failure,
            status_code: None,
            latency_ms,
            response_body: None,
            error_type: Some(error_type),
            error_message: Some(message.into()),
        }
    }
}

/// A persisted run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub id: RunId,
    pub execution_id: Uuid,
    /// May reference a schedule that has since been deleted.
    pub schedule_id: ScheduleId,
    pub executed_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub response_body: Option<String>,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
}

/// Filter for run history reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunQuery {
    pub schedule_id: Option<ScheduleId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Aggregates computed over the whole run history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_runs: u64,
    pub success_runs: u64,
    pub failed_runs: u64,
    pub avg_latency_ms: f64,
    pub failures_by_type: BTreeMap<ErrorType, u64>,
}

//! Error taxonomy for the scheduling core and its control surface.
//!
//! Network failures are not errors here: they are classified into
//! [`crate::model::ErrorType`] and recorded as FAILURE runs.

use thiserror::Error;

use crate::model::ScheduleStatus;

/// A malformed target or schedule definition. Raised before anything is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("interval_seconds must be greater than zero")]
    NonPositiveInterval,

    #[error("interval_seconds ({0}) exceeds the supported maximum")]
    IntervalTooLarge(u64),

    #[error("end_time must be after start_time")]
    EmptyWindow,

    #[error("interval_seconds ({interval_seconds}) exceeds the window duration ({window_seconds}s)")]
    IntervalExceedsWindow {
        interval_seconds: u64,
        window_seconds: i64,
    },

    #[error("max_runs must be at least 1")]
    ZeroMaxRuns,

    #[error("{field} ({value}) is outside the supported range of years {min}..={max}")]
    TimestampOutOfRange {
        field: &'static str,
        value: String,
        min: i32,
        max: i32,
    },

    #[error("invalid target url '{0}': expected an absolute http or https url")]
    InvalidUrl(String),

    #[error("unsupported http method '{0}'")]
    InvalidMethod(String),

    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}

impl ValidationError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NonPositiveInterval => "non_positive_interval",
            ValidationError::IntervalTooLarge(_) => "interval_too_large",
            ValidationError::EmptyWindow => "empty_window",
            ValidationError::IntervalExceedsWindow { .. } => "interval_exceeds_window",
            ValidationError::ZeroMaxRuns => "zero_max_runs",
            ValidationError::TimestampOutOfRange { .. } => "timestamp_out_of_range",
            ValidationError::InvalidUrl(_) => "invalid_url",
            ValidationError::InvalidMethod(_) => "invalid_method",
            ValidationError::InvalidHeader(_) => "invalid_header",
        }
    }
}

/// The store could not be reached or returned unusable data.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: i64,
        reason: String,
    },
}

/// Failures of control-surface operations (create, pause, resume, delete).
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("target {id} is still referenced by {schedules} schedule(s)")]
    TargetInUse { id: i64, schedules: i64 },

    #[error("cannot {action} a {status} schedule")]
    InvalidTransition {
        action: &'static str,
        status: ScheduleStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

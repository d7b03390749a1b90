//! Next-run resolution and schedule validation.
//!
//! Every schedule type is a variant of [`ScheduleConfig`]; [`compute_next`]
//! is the single decision function the engine consults. It is pure: the
//! current time and the tolerated firing lag are passed in.

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::error::ValidationError;
use crate::model::{ScheduleConfig, SchedulingState};

/// Upper bound on `interval_seconds` (roughly 100 years).
pub const MAX_INTERVAL_SECS: u64 = 100 * 366 * 24 * 60 * 60;

/// Earliest year a window may start or end in.
pub const MIN_YEAR: i32 = 1970;

/// Latest year a window may start or end in. Leaves room for one maximum
/// interval past `end_time` while every stored timestamp stays a four-digit
/// year, which keeps the text encoding fixed-width.
pub const MAX_YEAR: i32 = 9899;

/// What the engine should do with a due schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether this due observation results in a dispatch.
    pub fire: bool,
    /// The next nominal firing time.
    pub next_run_at: DateTime<Utc>,
    /// No further firings after this one.
    pub complete: bool,
}

/// Decide the next scheduling state for a due schedule observed at `now`.
///
/// `state.next_run_at` is the nominal time of the firing being taken. The
/// next time is that value plus one interval; when the engine is so far
/// behind that this is still not in the future, whole missed intervals are
/// skipped so the schedule keeps its phase and fires once, not once per
/// missed slot.
///
/// `late_tolerance` bounds how late a window firing may still happen past
/// `end_time`; the engine passes its tick interval.
pub fn compute_next(
    config: &ScheduleConfig,
    state: &SchedulingState,
    now: DateTime<Utc>,
    late_tolerance: Duration,
) -> Decision {
    match config {
        ScheduleConfig::Interval { interval_seconds } => Decision {
            fire: true,
            next_run_at: next_slot(state.next_run_at, *interval_seconds, now),
            complete: false,
        },

        ScheduleConfig::Window {
            interval_seconds,
            end_time,
            max_runs,
            ..
        } => {
            let exhausted = max_runs.is_some_and(|max| state.run_count >= max);
            if exhausted || now > *end_time + late_tolerance {
                // The window closed (or the budget ran out) while nobody was
                // looking: retire the schedule without firing.
                return Decision {
                    fire: false,
                    next_run_at: state.next_run_at,
                    complete: true,
                };
            }

            let next_run_at = next_slot(state.next_run_at, *interval_seconds, now);
            let last_allowed = max_runs.is_some_and(|max| state.run_count + 1 >= max);
            Decision {
                fire: true,
                next_run_at,
                complete: last_allowed || next_run_at > *end_time,
            }
        }
    }
}

/// First `next_run_at` for a freshly created schedule.
pub fn initial_run(config: &ScheduleConfig, created_at: DateTime<Utc>) -> DateTime<Utc> {
    match config {
        ScheduleConfig::Interval { .. } => created_at,
        ScheduleConfig::Window { start_time, .. } => *start_time,
    }
}

/// Reject malformed configurations. Called on the creation path before
/// anything is persisted.
pub fn validate(config: &ScheduleConfig) -> Result<(), ValidationError> {
    let interval_seconds = config.interval_seconds();
    if interval_seconds == 0 {
        return Err(ValidationError::NonPositiveInterval);
    }
    if interval_seconds > MAX_INTERVAL_SECS {
        return Err(ValidationError::IntervalTooLarge(interval_seconds));
    }

    if let ScheduleConfig::Window {
        start_time,
        end_time,
        max_runs,
        ..
    } = config
    {
        check_year("start_time", start_time)?;
        check_year("end_time", end_time)?;
        if end_time <= start_time {
            return Err(ValidationError::EmptyWindow);
        }
        let window_seconds = (*end_time - *start_time).num_seconds();
        if interval_seconds > window_seconds.max(0) as u64 {
            return Err(ValidationError::IntervalExceedsWindow {
                interval_seconds,
                window_seconds,
            });
        }
        if *max_runs == Some(0) {
            return Err(ValidationError::ZeroMaxRuns);
        }
    }

    Ok(())
}

fn check_year(field: &'static str, ts: &DateTime<Utc>) -> Result<(), ValidationError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&ts.year()) {
        return Ok(());
    }
    Err(ValidationError::TimestampOutOfRange {
        field,
        value: ts.to_rfc3339(),
        min: MIN_YEAR,
        max: MAX_YEAR,
    })
}

fn next_slot(previous: DateTime<Utc>, interval_seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    // Validated configs keep this well inside i64.
    let step = Duration::seconds(interval_seconds.min(MAX_INTERVAL_SECS) as i64);
    let candidate = previous + step;
    if candidate > now {
        return candidate;
    }

    let step_ms = step.num_milliseconds().max(1);
    let behind_ms = (now - previous).num_milliseconds();
    let slots = behind_ms / step_ms + 1;
    previous + Duration::milliseconds(slots * step_ms)
}

//! The scheduler loop.
//!
//! Every tick selects due schedules, advances each one in the store with a
//! compare-and-swap, and only then hands a snapshot to the dispatcher. A
//! schedule whose advance has been persisted is no longer due, so an
//! overlapping tick cannot select it again. The price is that a crash
//! between advance and dispatch loses that one firing; a duplicate is
//! judged worse.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::strategy;
use crate::dispatch::Dispatcher;
use crate::error::StoreError;
use crate::model::{Execution, ScheduleStatus, SchedulingState};
use crate::storage::JobStore;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Schedules observed due.
    pub due: usize,
    /// Executions handed to the dispatcher.
    pub dispatched: usize,
    /// Schedules that reached COMPLETED this tick.
    pub completed: usize,
    /// Advances that lost the compare-and-swap to a concurrent update.
    pub contended: usize,
    /// Advances that failed in the store; those schedules stay due.
    pub failed: usize,
}

pub struct SchedulerEngine {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            tick_interval,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Poll until `shutdown` is cancelled. A failed tick is logged and the
    /// loop carries on.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "scheduler engine started");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler engine stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!(error = %e, "tick aborted, retrying on the next one");
                    }
                }
            }
        }
    }

    /// One pass at the clock's current time.
    pub fn tick(&self) -> Result<TickReport, StoreError> {
        self.tick_at(self.clock.now())
    }

    /// One pass at `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let mut due = self.store.due_jobs(now)?;
        due.sort_by(|a, b| {
            (a.schedule.next_run_at, a.schedule.id).cmp(&(b.schedule.next_run_at, b.schedule.id))
        });

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        debug!(due = due.len(), %now, "tick");

        let tolerance = chrono::Duration::from_std(self.tick_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));

        for job in due {
            let schedule_id = job.schedule.id;
            let current = job.schedule.scheduling_state();
            let decision = strategy::compute_next(&job.schedule.config, &current, now, tolerance);

            let next = SchedulingState {
                next_run_at: decision.next_run_at,
                status: if decision.complete {
                    ScheduleStatus::Completed
                } else {
                    ScheduleStatus::Active
                },
                run_count: current.run_count + u32::from(decision.fire),
            };

            match self.store.advance(schedule_id, &current, &next, now) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(schedule_id, "advance lost to a concurrent update, skipping");
                    report.contended += 1;
                    continue;
                }
                Err(e) => {
                    error!(schedule_id, error = %e, "failed to advance schedule, it stays due");
                    report.failed += 1;
                    continue;
                }
            }

            if next.status == ScheduleStatus::Completed {
                info!(schedule_id, run_count = next.run_count, "schedule completed");
                report.completed += 1;
            }

            if !decision.fire {
                warn!(
                    schedule_id,
                    scheduled_for = %current.next_run_at,
                    "window closed before the schedule could fire"
                );
                continue;
            }

            let execution = Execution::new(job.schedule, job.target);
            info!(
                schedule_id,
                execution_id = %execution.execution_id,
                scheduled_for = %execution.scheduled_for,
                lag_ms = (now - execution.scheduled_for).num_milliseconds(),
                next_run_at = %next.next_run_at,
                "dispatching"
            );
            self.dispatcher.submit(execution);
            report.dispatched += 1;
        }

        Ok(report)
    }
}

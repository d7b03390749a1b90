use std::sync::Arc;

use reqwest::{Method, Url};
use tracing::info;

use super::clock::Clock;
use super::strategy;
use crate::error::{ControlError, ControlResult, ValidationError};
use crate::model::{
    NewSchedule, NewTarget, Run, RunId, RunQuery, RunStats, Schedule, ScheduleId, ScheduleStatus,
    Target, TargetId,
};
use crate::storage::{SqliteStore, TargetDeletion};

/// Control surface over persisted targets and schedules: creation with
/// validation, pause/resume, deletion, and history reads.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(store: Arc<SqliteStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    // --- targets -----------------------------------------------------------

    pub fn create_target(&self, new: NewTarget) -> ControlResult<Target> {
        let new = validate_target(new)?;
        let target = self.store.insert_target(&new, self.clock.now())?;
        info!(target_id = target.id, url = %target.url, method = %target.method, "target created");
        Ok(target)
    }

    pub fn target(&self, id: TargetId) -> ControlResult<Target> {
        self.store
            .target(id)?
            .ok_or(ControlError::NotFound { entity: "target", id })
    }

    pub fn list_targets(&self) -> ControlResult<Vec<Target>> {
        Ok(self.store.list_targets()?)
    }

    /// Delete a target. Refused while any schedule references it.
    pub fn delete_target(&self, id: TargetId) -> ControlResult<()> {
        match self.store.delete_target(id)? {
            TargetDeletion::Deleted => {
                info!(target_id = id, "target deleted");
                Ok(())
            }
            TargetDeletion::NotFound => Err(ControlError::NotFound { entity: "target", id }),
            TargetDeletion::InUse(schedules) => Err(ControlError::TargetInUse { id, schedules }),
        }
    }

    // --- schedules ---------------------------------------------------------

    /// Validate and persist a schedule. Nothing is written if validation fails.
    pub fn create_schedule(&self, new: NewSchedule) -> ControlResult<Schedule> {
        let now = self.clock.now();
        let config = new.schedule.resolve(now);
        strategy::validate(&config)?;

        if self.store.target(new.target_id)?.is_none() {
            return Err(ControlError::NotFound {
                entity: "target",
                id: new.target_id,
            });
        }

        let next_run_at = strategy::initial_run(&config, now);
        let schedule = self
            .store
            .insert_schedule(new.target_id, &config, next_run_at, now)?;
        info!(
            schedule_id = schedule.id,
            target_id = schedule.target_id,
            kind = config.kind(),
            interval_seconds = config.interval_seconds(),
            next_run_at = %schedule.next_run_at,
            "schedule created"
        );
        Ok(schedule)
    }

    pub fn schedule(&self, id: ScheduleId) -> ControlResult<Schedule> {
        self.store
            .schedule(id)?
            .ok_or(ControlError::NotFound { entity: "schedule", id })
    }

    pub fn list_schedules(&self) -> ControlResult<Vec<Schedule>> {
        Ok(self.store.list_schedules()?)
    }

    /// ACTIVE -> PAUSED. Pausing a paused schedule is a no-op. In-flight
    /// executions are not cancelled.
    pub fn pause(&self, id: ScheduleId) -> ControlResult<Schedule> {
        self.transition(
            id,
            "pause",
            &[ScheduleStatus::Active, ScheduleStatus::Paused],
            ScheduleStatus::Paused,
        )
    }

    /// PAUSED -> ACTIVE. `next_run_at` is left as it was, so a schedule whose
    /// slot passed while paused fires once on the next tick and then resumes
    /// its original phase.
    pub fn resume(&self, id: ScheduleId) -> ControlResult<Schedule> {
        self.transition(
            id,
            "resume",
            &[ScheduleStatus::Paused, ScheduleStatus::Active],
            ScheduleStatus::Active,
        )
    }

    /// Delete a schedule. Its run history is kept.
    pub fn delete_schedule(&self, id: ScheduleId) -> ControlResult<()> {
        if !self.store.delete_schedule(id)? {
            return Err(ControlError::NotFound { entity: "schedule", id });
        }
        info!(schedule_id = id, "schedule deleted");
        Ok(())
    }

    fn transition(
        &self,
        id: ScheduleId,
        action: &'static str,
        from: &[ScheduleStatus],
        to: ScheduleStatus,
    ) -> ControlResult<Schedule> {
        if !self.store.transition_status(id, from, to, self.clock.now())? {
            let current = self.schedule(id)?;
            return Err(ControlError::InvalidTransition {
                action,
                status: current.status,
            });
        }
        let schedule = self.schedule(id)?;
        info!(schedule_id = id, status = %schedule.status, "schedule {action}d");
        Ok(schedule)
    }

    // --- history -----------------------------------------------------------

    pub fn runs(&self, query: &RunQuery) -> ControlResult<Vec<Run>> {
        Ok(self.store.runs(query)?)
    }

    pub fn run(&self, id: RunId) -> ControlResult<Run> {
        self.store
            .run(id)?
            .ok_or(ControlError::NotFound { entity: "run", id })
    }

    pub fn run_stats(&self) -> ControlResult<RunStats> {
        Ok(self.store.run_stats()?)
    }
}

fn validate_target(mut new: NewTarget) -> Result<NewTarget, ValidationError> {
    let url = Url::parse(&new.url).map_err(|_| ValidationError::InvalidUrl(new.url.clone()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(new.url));
    }

    let method = new.method.trim().to_ascii_uppercase();
    if method.is_empty() || Method::from_bytes(method.as_bytes()).is_err() {
        return Err(ValidationError::InvalidMethod(new.method));
    }
    new.method = method;

    for (name, value) in &new.headers {
        let valid = reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_ok()
            && reqwest::header::HeaderValue::from_str(value).is_ok();
        if !valid {
            return Err(ValidationError::InvalidHeader(name.clone()));
        }
    }

    Ok(new)
}

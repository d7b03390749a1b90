//! Scheduling properties driven by a manual clock and an in-process executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use httpcron::dispatch::{Dispatcher, Executor};
use httpcron::error::StoreError;
use httpcron::model::{
    Execution, ExecutionResult, NewSchedule, NewTarget, RunOutcome, RunQuery, Schedule,
    ScheduleId, ScheduleSpec, ScheduleStatus, SchedulingState,
};
use httpcron::observers::{ObserverSet, RunObserver, RunRecorder};
use httpcron::scheduler::{Clock, ManualClock, Scheduler, SchedulerEngine};
use httpcron::storage::{open_pool, DueJob, JobStore, SqliteStore};

const TICK: StdDuration = StdDuration::from_secs(5);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Answers 200 instantly and stamps results with the manual clock.
struct StubExecutor {
    clock: Arc<ManualClock>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Executor for StubExecutor {
    async fn execute(&self, execution: &Execution) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExecutionResult::response(execution, self.clock.now(), 200, 1, Some("ok".into()))
    }
}

/// Wraps the real store so a test can freeze the due snapshot or make
/// advances fail.
struct ScriptedStore {
    inner: Arc<SqliteStore>,
    snapshot: Mutex<Option<Vec<DueJob>>>,
    failing_advances: AtomicUsize,
}

impl ScriptedStore {
    fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            snapshot: Mutex::new(None),
            failing_advances: AtomicUsize::new(0),
        }
    }

    fn freeze(&self, jobs: Vec<DueJob>) {
        *self.snapshot.lock().unwrap() = Some(jobs);
    }
}

impl JobStore for ScriptedStore {
    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<DueJob>, StoreError> {
        if let Some(jobs) = self.snapshot.lock().unwrap().clone() {
            return Ok(jobs);
        }
        self.inner.due_jobs(now)
    }

    fn advance(
        &self,
        id: ScheduleId,
        expected: &SchedulingState,
        next: &SchedulingState,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let failing = self.failing_advances.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_advances.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("database is locked".into()),
            )));
        }
        self.inner.advance(id, expected, next, at)
    }

    fn insert_run(&self, result: &ExecutionResult) -> Result<Option<i64>, StoreError> {
        self.inner.insert_run(result)
    }
}

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    store: Arc<SqliteStore>,
    scripted: Arc<ScriptedStore>,
    control: Scheduler,
    executor: Arc<StubExecutor>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("scheduling.db")).unwrap();
        let store = Arc::new(SqliteStore::new(pool));
        let clock = Arc::new(ManualClock::new(t0()));
        let executor = Arc::new(StubExecutor {
            clock: clock.clone(),
            calls: AtomicUsize::new(0),
        });
        let observers = ObserverSet::new(vec![
            Arc::new(RunRecorder::new(store.clone())) as Arc<dyn RunObserver>
        ]);
        let dispatcher = Dispatcher::new(executor.clone(), observers, 4);
        Self {
            _dir: dir,
            scripted: Arc::new(ScriptedStore::new(store.clone())),
            control: Scheduler::new(store.clone(), clock.clone()),
            clock,
            store,
            executor,
            dispatcher,
        }
    }

    /// An engine reading through the scripted store.
    fn engine(&self) -> SchedulerEngine {
        SchedulerEngine::new(
            self.scripted.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            TICK,
        )
    }

    fn schedule(&self, spec: ScheduleSpec) -> Schedule {
        let target = self
            .control
            .create_target(NewTarget::get("http://example.test/hook"))
            .unwrap();
        self.control
            .create_schedule(NewSchedule {
                target_id: target.id,
                schedule: spec,
            })
            .unwrap()
    }

    fn reload(&self, id: ScheduleId) -> Schedule {
        self.control.schedule(id).unwrap()
    }

    fn runs(&self, id: ScheduleId) -> Vec<httpcron::model::Run> {
        self.control
            .runs(&RunQuery {
                schedule_id: Some(id),
                ..RunQuery::default()
            })
            .unwrap()
    }

    fn calls(&self) -> usize {
        self.executor.calls.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn window_with_max_runs_fires_exactly_that_many_times() {
    let h = Harness::new();
    let engine = h.engine();
    let schedule = h.schedule(ScheduleSpec::Window {
        interval_seconds: 10,
        start_time: Some(t0()),
        end_time: t0() + Duration::hours(1),
        max_runs: Some(3),
    });

    for step in 0..6 {
        h.clock.set(t0() + Duration::seconds(10 * step));
        engine.tick().unwrap();
        h.dispatcher.wait_idle().await;
    }

    let after = h.reload(schedule.id);
    assert_eq!(after.status, ScheduleStatus::Completed);
    assert_eq!(after.run_count, 3);
    assert_eq!(h.runs(schedule.id).len(), 3);
    assert_eq!(h.calls(), 3);

    // Completed schedules are never due again.
    h.clock.advance(Duration::hours(2));
    assert_eq!(engine.tick().unwrap().due, 0);
}

#[tokio::test]
async fn interval_advances_by_exactly_one_interval() {
    let h = Harness::new();
    let engine = h.engine();
    let schedule = h.schedule(ScheduleSpec::Interval { interval_seconds: 10 });
    assert_eq!(schedule.next_run_at, t0());

    // Ticks land late; the schedule must not drift with them.
    h.clock.set(t0() + Duration::seconds(3));
    engine.tick().unwrap();
    assert_eq!(h.reload(schedule.id).next_run_at, t0() + Duration::seconds(10));

    h.clock.set(t0() + Duration::seconds(14));
    engine.tick().unwrap();
    assert_eq!(h.reload(schedule.id).next_run_at, t0() + Duration::seconds(20));

    h.dispatcher.wait_idle().await;
    assert_eq!(h.runs(schedule.id).len(), 2);
}

#[tokio::test]
async fn long_outage_fires_once() {
    let h = Harness::new();
    let engine = h.engine();
    let schedule = h.schedule(ScheduleSpec::Interval { interval_seconds: 10 });

    h.clock.set(t0() + Duration::hours(1));
    let report = engine.tick().unwrap();
    assert_eq!(report.dispatched, 1);

    let after = h.reload(schedule.id);
    assert_eq!(after.run_count, 1);
    assert_eq!(after.next_run_at, t0() + Duration::seconds(3610));
    assert!(after.next_run_at > h.clock.now());

    assert_eq!(engine.tick().unwrap().due, 0);
    h.dispatcher.wait_idle().await;
    assert_eq!(h.calls(), 1);
}

#[tokio::test]
async fn overlapping_passes_advance_once() {
    let h = Harness::new();
    let schedule = h.schedule(ScheduleSpec::Interval { interval_seconds: 10 });

    let snapshot = h.store.due_jobs(h.clock.now()).unwrap();
    assert_eq!(snapshot.len(), 1);
    h.scripted.freeze(snapshot);

    let first = h.engine();
    let second = h.engine();
    let (a, b) = futures::join!(async { first.tick().unwrap() }, async {
        second.tick().unwrap()
    });

    assert_eq!(a.dispatched + b.dispatched, 1);
    assert_eq!(a.contended + b.contended, 1);

    h.dispatcher.wait_idle().await;
    assert_eq!(h.calls(), 1);
    assert_eq!(h.runs(schedule.id).len(), 1);
    assert_eq!(h.reload(schedule.id).run_count, 1);
}

#[tokio::test]
async fn pause_between_selection_and_advance_wins() {
    let h = Harness::new();
    let schedule = h.schedule(ScheduleSpec::Interval { interval_seconds: 10 });

    h.scripted.freeze(h.store.due_jobs(h.clock.now()).unwrap());
    h.control.pause(schedule.id).unwrap();

    let report = h.engine().tick().unwrap();
    assert_eq!(report.contended, 1);
    assert_eq!(report.dispatched, 0);

    let after = h.reload(schedule.id);
    assert_eq!(after.status, ScheduleStatus::Paused);
    assert_eq!(after.next_run_at, schedule.next_run_at);
    h.dispatcher.wait_idle().await;
    assert_eq!(h.calls(), 0);
}

#[tokio::test]
async fn failed_advance_leaves_schedule_due() {
    let h = Harness::new();
    let engine = h.engine();
    let schedule = h.schedule(ScheduleSpec::Interval { interval_seconds: 10 });
    h.scripted.failing_advances.store(1, Ordering::SeqCst);

    let report = engine.tick().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.reload(schedule.id).next_run_at, t0());

    h.clock.advance(Duration::seconds(5));
    let report = engine.tick().unwrap();
    assert_eq!(report.dispatched, 1);

    h.dispatcher.wait_idle().await;
    assert_eq!(h.runs(schedule.id).len(), 1);
}

#[tokio::test]
async fn window_runs_never_land_after_end_plus_tick() {
    let h = Harness::new();
    let engine = h.engine();
    let end = t0() + Duration::seconds(25);
    let schedule = h.schedule(ScheduleSpec::Window {
        interval_seconds: 10,
        start_time: Some(t0()),
        end_time: end,
        max_runs: None,
    });

    for step in 0..10 {
        h.clock.set(t0() + Duration::seconds(5 * step));
        engine.tick().unwrap();
        // Let executions stamp the time they actually ran at.
        h.dispatcher.wait_idle().await;
    }

    let runs = h.runs(schedule.id);
    assert_eq!(runs.len(), 3);
    let limit = end + Duration::from_std(TICK).unwrap();
    assert!(runs.iter().all(|r| r.executed_at <= limit));
    assert!(runs.iter().all(|r| r.outcome == RunOutcome::Success));
    assert_eq!(h.reload(schedule.id).status, ScheduleStatus::Completed);
}

#[tokio::test]
async fn window_first_seen_after_close_completes_without_firing() {
    let h = Harness::new();
    let engine = h.engine();
    let schedule = h.schedule(ScheduleSpec::Window {
        interval_seconds: 10,
        start_time: Some(t0()),
        end_time: t0() + Duration::seconds(60),
        max_runs: None,
    });

    h.clock.set(t0() + Duration::seconds(70));
    let report = engine.tick().unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.completed, 1);

    let after = h.reload(schedule.id);
    assert_eq!(after.status, ScheduleStatus::Completed);
    assert_eq!(after.run_count, 0);
    h.dispatcher.wait_idle().await;
    assert!(h.runs(schedule.id).is_empty());
}

#[tokio::test]
async fn due_jobs_are_processed_oldest_first() {
    let h = Harness::new();
    let late = h.schedule(ScheduleSpec::Interval { interval_seconds: 30 });
    h.clock.set(t0() - Duration::seconds(20));
    let early = h.schedule(ScheduleSpec::Interval { interval_seconds: 30 });
    h.clock.set(t0());

    let due = h.store.due_jobs(t0()).unwrap();
    let ids: Vec<_> = due.iter().map(|j| j.schedule.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);

    let report = h.engine().tick().unwrap();
    assert_eq!(report.dispatched, 2);
    h.dispatcher.wait_idle().await;
}

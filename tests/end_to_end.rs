//! Real HTTP against an in-process target server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::routing::get;
use axum::Router;
use chrono::{Duration, TimeZone, Utc};

use httpcron::dispatch::http::HttpExecutor;
use httpcron::dispatch::{Dispatcher, Executor};
use httpcron::model::{
    ErrorType, Execution, NewSchedule, NewTarget, RunOutcome, RunQuery, Schedule, ScheduleConfig,
    ScheduleSpec, ScheduleStatus, Target,
};
use httpcron::observers::{LiveMetrics, ObserverSet, RunObserver, RunRecorder};
use httpcron::scheduler::{ManualClock, Scheduler, SchedulerEngine};
use httpcron::storage::{open_pool, SqliteStore};

/// Spawn a target server on an ephemeral port and return its base URL.
async fn spawn_target(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new()
        .route(
            "/ok",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "pong"
                }
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(StdDuration::from_secs(2)).await;
                "late"
            }),
        )
        .route(
            "/broken",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/big", get(|| async { "x".repeat(10_000) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn execution(url: &str) -> Execution {
    let now = Utc::now();
    let new = NewTarget::get(url);
    let target = Target {
        id: 1,
        url: new.url,
        method: new.method,
        headers: new.headers,
        body_template: None,
        created_at: now,
    };
    let schedule = Schedule {
        id: 1,
        target_id: 1,
        config: ScheduleConfig::Interval { interval_seconds: 10 },
        status: ScheduleStatus::Active,
        next_run_at: now,
        run_count: 0,
        created_at: now,
    };
    Execution::new(schedule, target)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interval_job_records_two_successes_in_twenty_seconds() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = spawn_target(hits.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(open_pool(dir.path().join("e2e.db")).unwrap()));
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(t0));

    let metrics = Arc::new(LiveMetrics::default());
    let observers = ObserverSet::new(vec![
        Arc::new(RunRecorder::new(store.clone())) as Arc<dyn RunObserver>,
        metrics.clone() as Arc<dyn RunObserver>,
    ]);
    let executor = Arc::new(HttpExecutor::with_limits(StdDuration::from_secs(5), 200).unwrap());
    let dispatcher = Dispatcher::new(executor, observers, 4);
    let engine = SchedulerEngine::new(
        store.clone(),
        dispatcher.clone(),
        clock.clone(),
        StdDuration::from_secs(5),
    );
    let control = Scheduler::new(store, clock.clone());

    let target = control
        .create_target(NewTarget::get(format!("{base}/ok")))
        .unwrap();
    let schedule = control
        .create_schedule(NewSchedule {
            target_id: target.id,
            schedule: ScheduleSpec::Interval { interval_seconds: 10 },
        })
        .unwrap();

    // Twenty seconds of ticks: T0, T0+5, T0+10, T0+15.
    for step in 0..4 {
        clock.set(t0 + Duration::seconds(5 * step));
        engine.tick().unwrap();
    }
    dispatcher.wait_idle().await;

    let runs = control
        .runs(&RunQuery {
            schedule_id: Some(schedule.id),
            ..RunQuery::default()
        })
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.outcome == RunOutcome::Success));
    assert!(runs.iter().all(|r| r.status_code == Some(200)));
    assert!(runs.iter().all(|r| r.response_body.as_deref() == Some("pong")));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let after = control.schedule(schedule.id).unwrap();
    assert_eq!(after.next_run_at, t0 + Duration::seconds(20));
    assert_eq!(after.run_count, 2);

    assert_eq!(metrics.snapshot().successes, 2);
    let stats = control.run_stats().unwrap();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.success_runs, 2);
}

#[tokio::test]
async fn http_error_status_is_failure_without_error_type() {
    let base = spawn_target(Arc::new(AtomicUsize::new(0))).await;
    let executor = HttpExecutor::with_limits(StdDuration::from_secs(5), 200).unwrap();

    let result = executor.execute(&execution(&format!("{base}/broken"))).await;
    assert_eq!(result.outcome, RunOutcome::Failure);
    assert_eq!(result.status_code, Some(500));
    assert_eq!(result.error_type, None);
    assert_eq!(result.response_body.as_deref(), Some("boom"));
}

#[tokio::test]
async fn response_body_is_capped() {
    let base = spawn_target(Arc::new(AtomicUsize::new(0))).await;
    let executor = HttpExecutor::with_limits(StdDuration::from_secs(5), 200).unwrap();

    let result = executor.execute(&execution(&format!("{base}/big"))).await;
    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.response_body.map(|b| b.len()), Some(200));
}

#[tokio::test]
async fn slow_target_times_out() {
    let base = spawn_target(Arc::new(AtomicUsize::new(0))).await;
    let executor = HttpExecutor::with_limits(StdDuration::from_millis(200), 200).unwrap();

    let result = executor.execute(&execution(&format!("{base}/slow"))).await;
    assert_eq!(result.outcome, RunOutcome::Failure);
    assert_eq!(result.error_type, Some(ErrorType::Timeout));
    assert_eq!(result.status_code, None);
    assert!(result.latency_ms < 2_000);
}

#[tokio::test]
async fn closed_port_is_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = HttpExecutor::with_limits(StdDuration::from_secs(5), 200).unwrap();
    let result = executor.execute(&execution(&format!("http://{addr}/"))).await;
    assert_eq!(result.outcome, RunOutcome::Failure);
    assert_eq!(result.error_type, Some(ErrorType::ConnectionRefused));
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn unresolvable_host_is_dns_error() {
    let executor = HttpExecutor::with_limits(StdDuration::from_secs(5), 200).unwrap();
    let result = executor
        .execute(&execution("http://httpcron-does-not-exist.invalid/"))
        .await;
    assert_eq!(result.outcome, RunOutcome::Failure);
    assert_eq!(result.error_type, Some(ErrorType::DnsError));
}

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use super::RunObserver;
use crate::model::{ErrorType, ExecutionResult, RunOutcome};

/// Process-local execution counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub failures_by_type: BTreeMap<ErrorType, u64>,
    pub latency_ms_total: u64,
    pub latency_ms_max: u64,
}

impl MetricsSnapshot {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.latency_ms_total as f64 / self.executions as f64
        }
    }
}

/// Best-effort in-memory aggregation. Resets on restart.
#[derive(Default)]
pub struct LiveMetrics {
    counters: Mutex<MetricsSnapshot>,
}

impl LiveMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, result: &ExecutionResult) {
        let mut c = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        c.executions += 1;
        match result.outcome {
            RunOutcome::Success => c.successes += 1,
            RunOutcome::Failure => c.failures += 1,
        }
        if let Some(ty) = result.error_type {
            *c.failures_by_type.entry(ty).or_default() += 1;
        }
        c.latency_ms_total = c.latency_ms_total.saturating_add(result.latency_ms);
        c.latency_ms_max = c.latency_ms_max.max(result.latency_ms);
    }
}

#[async_trait::async_trait]
impl RunObserver for LiveMetrics {
    fn name(&self) -> &'static str {
        "live-metrics"
    }

    async fn on_complete(&self, result: &ExecutionResult) -> anyhow::Result<()> {
        self.record(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn result(outcome: RunOutcome, error_type: Option<ErrorType>, latency_ms: u64) -> ExecutionResult {
        ExecutionResult {
            execution_id: Uuid::new_v4(),
            schedule_id: 7,
            executed_at: Utc::now(),
            outcome,
            status_code: error_type.is_none().then_some(200),
            latency_ms,
            response_body: None,
            error_type,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn counts_outcomes_and_latency() {
        let metrics = LiveMetrics::default();
        metrics.on_complete(&result(RunOutcome::Success, None, 10)).await.unwrap();
        metrics
            .on_complete(&result(RunOutcome::Failure, Some(ErrorType::Timeout), 50))
            .await
            .unwrap();
        metrics
            .on_complete(&result(RunOutcome::Failure, Some(ErrorType::Timeout), 30))
            .await
            .unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.executions, 3);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 2);
        assert_eq!(snap.failures_by_type.get(&ErrorType::Timeout), Some(&2));
        assert_eq!(snap.latency_ms_max, 50);
        assert_eq!(snap.avg_latency_ms(), 30.0);
    }
}

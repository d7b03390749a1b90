//! Result observers -- consumers of execution completion events.
//!
//! Observers run in registration order after every execution. The run
//! recorder is the one that matters for correctness; anything else is
//! best-effort. Delivery is at-least-once with no dedup across process
//! restarts, so observers must tolerate seeing a result again.

mod metrics;
mod recorder;

pub use metrics::{LiveMetrics, MetricsSnapshot};
pub use recorder::RunRecorder;

use std::sync::Arc;

use tracing::error;

use crate::model::ExecutionResult;

#[async_trait::async_trait]
pub trait RunObserver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_complete(&self, result: &ExecutionResult) -> anyhow::Result<()>;
}

/// Ordered list of observers. A failing observer is logged and does not
/// stop the ones after it.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl ObserverSet {
    pub fn new(observers: Vec<Arc<dyn RunObserver>>) -> Self {
        Self { observers }
    }

    pub fn push(&mut self, observer: Arc<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn notify(&self, result: &ExecutionResult) {
        for observer in &self.observers {
            if let Err(e) = observer.on_complete(result).await {
                error!(
                    observer = observer.name(),
                    execution_id = %result.execution_id,
                    schedule_id = result.schedule_id,
                    error = %e,
                    "observer failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunOutcome;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Named {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl RunObserver for Named {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_complete(&self, _result: &ExecutionResult) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("{} is down", self.name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn observers_run_in_order_and_failures_do_not_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ObserverSet::default();
        for (name, fail) in [("first", false), ("second", true), ("third", false)] {
            set.push(Arc::new(Named {
                name,
                fail,
                log: log.clone(),
            }));
        }
        assert_eq!(set.len(), 3);

        let result = ExecutionResult {
            execution_id: Uuid::new_v4(),
            schedule_id: 1,
            executed_at: Utc::now(),
            outcome: RunOutcome::Success,
            status_code: Some(200),
            latency_ms: 5,
            response_body: None,
            error_type: None,
            error_message: None,
        };
        set.notify(&result).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }
}

//! Execution dispatcher -- runs submitted executions on a bounded pool of
//! workers, off the scheduling path.
//!
//! `submit` never blocks: the execution is queued on the task tracker and
//! waits for a worker permit there. Once the executor returns, the result is
//! handed to the observers in registration order.

pub mod classify;
pub mod http;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info_span, warn, Instrument};

use crate::model::{Execution, ExecutionResult};
use crate::observers::ObserverSet;

/// Performs one execution. Implementations never fail: every outcome,
/// including transport errors and timeouts, is normalized into the result.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, execution: &Execution) -> ExecutionResult;
}

/// Cloneable handle to the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<dyn Executor>,
    observers: ObserverSet,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Set once by `shutdown`. Guards every close/reopen of `tracker`.
    shut_down: Mutex<bool>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn Executor>, observers: ObserverSet, max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                observers,
                permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
                tracker: TaskTracker::new(),
                shut_down: Mutex::new(false),
            }),
        }
    }

    /// Queue an execution and return immediately.
    pub fn submit(&self, execution: Execution) {
        let inner = Arc::clone(&self.inner);
        let span = info_span!(
            "execution",
            execution_id = %execution.execution_id,
            schedule_id = execution.schedule.id,
        );
        debug!(execution_id = %execution.execution_id, "execution submitted");

        self.inner.tracker.spawn(
            async move {
                let permit = match Arc::clone(&inner.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("worker pool closed, execution dropped");
                        return;
                    }
                };
                let result = inner.executor.execute(&execution).await;
                drop(permit);

                inner.observers.notify(&result).await;
            }
            .instrument(span),
        );
    }

    /// Number of executions queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// True once `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        *self.lifecycle()
    }

    /// Wait until every execution submitted so far has finished and been
    /// observed. Used by tests and tooling to reach a quiescent point; it is
    /// not a drain. New submissions are accepted afterwards unless `shutdown`
    /// was called in the meantime, in which case the pool stays closed.
    pub async fn wait_idle(&self) {
        {
            let _guard = self.lifecycle();
            self.inner.tracker.close();
        }
        self.inner.tracker.wait().await;

        let shut_down = self.lifecycle();
        if !*shut_down {
            self.inner.tracker.reopen();
        }
    }

    /// Drain everything in flight before process exit. The pool is not
    /// reopened afterwards.
    pub async fn shutdown(&self) {
        {
            let mut shut_down = self.lifecycle();
            *shut_down = true;
            self.inner.tracker.close();
        }
        self.inner.tracker.wait().await;
    }

    fn lifecycle(&self) -> MutexGuard<'_, bool> {
        self.inner
            .shut_down
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

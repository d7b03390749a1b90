use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use super::RunObserver;
use crate::model::ExecutionResult;
use crate::storage::JobStore;

/// Persists every execution result as a Run record.
pub struct RunRecorder {
    store: Arc<dyn JobStore>,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl RunObserver for RunRecorder {
    fn name(&self) -> &'static str {
        "run-recorder"
    }

    async fn on_complete(&self, result: &ExecutionResult) -> anyhow::Result<()> {
        let inserted = self
            .store
            .insert_run(result)
            .with_context(|| format!("failed to record run for execution {}", result.execution_id))?;

        match inserted {
            Some(run_id) => info!(
                run_id,
                schedule_id = result.schedule_id,
                outcome = result.outcome.as_str(),
                status_code = ?result.status_code,
                latency_ms = result.latency_ms,
                error_type = ?result.error_type,
                "run recorded"
            ),
            None => debug!(execution_id = %result.execution_id, "run already recorded"),
        }
        Ok(())
    }
}

use std::sync::Arc;

use crate::observers::LiveMetrics;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub metrics: Arc<LiveMetrics>,
}

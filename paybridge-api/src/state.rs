use std::sync::Arc;
use paybridge_orchestrator::OperationOrchestrator;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OperationOrchestrator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(orchestrator: OperationOrchestrator, metrics: Metrics) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            metrics: Arc::new(metrics),
        }
    }
}

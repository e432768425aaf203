use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use paybridge_core::{OperationKind, ResultEnvelope};
use paybridge_orchestrator::OrchestratorResult;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::{error::AppError, state::AppState};

pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("paybridge_operations_total", "Money-moving operations by kind and outcome"),
            &["kind", "outcome"],
        )?;
        let in_flight = IntGauge::new(
            "paybridge_operations_in_flight",
            "Ledger records still waiting for a definitive gateway answer",
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self { registry, operations, in_flight })
    }

    /// Count one finished call. Successful envelopes are labelled by status, errors by code.
    pub fn observe(&self, kind: OperationKind, result: &OrchestratorResult<ResultEnvelope>) {
        let outcome = match result {
            Ok(envelope) => format!("{:?}", envelope.status).to_lowercase(),
            Err(err) => err.code().to_lowercase(),
        };
        let kind = kind.as_str().to_lowercase();
        self.operations
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn operations_count(&self, kind: OperationKind, outcome: &str) -> u64 {
        let kind = kind.as_str().to_lowercase();
        self.operations.with_label_values(&[kind.as_str(), outcome]).get()
    }

    pub fn render(&self) -> Result<(String, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        let text = String::from_utf8_lossy(&buffer).into_owned();
        Ok((encoder.format_type().to_string(), text))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(scrape))
}

async fn scrape(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let in_flight = state.orchestrator.in_flight_operations().await?;
    state.metrics.in_flight.set(in_flight.len() as i64);

    let (content_type, body) = state
        .metrics
        .render()
        .map_err(|e| AppError::Anyhow(e.into()))?;
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use paybridge_core::CallContext;
use paybridge_orchestrator::ReconcileOutcome;
use paybridge_store::IdempotencyRecord;
use serde::Serialize;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileStatus {
    Resolved,
    StillInFlight,
    AlreadySettled,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub status: ReconcileStatus,
    pub record: IdempotencyRecord,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        let (status, record) = match outcome {
            ReconcileOutcome::Resolved(record) => (ReconcileStatus::Resolved, record),
            ReconcileOutcome::StillInFlight(record) => (ReconcileStatus::StillInFlight, record),
            ReconcileOutcome::AlreadySettled(record) => (ReconcileStatus::AlreadySettled, record),
        };
        Self { status, record }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/operations", get(list_in_flight))
        .route(
            "/v1/operations/{operation_id}",
            get(get_operation).delete(purge_operation),
        )
        .route("/v1/operations/{operation_id}/reconcile", post(reconcile_operation))
}

/// GET /v1/operations
/// In-flight records only, oldest first.
async fn list_in_flight(State(state): State<AppState>) -> Result<Json<Vec<IdempotencyRecord>>, AppError> {
    Ok(Json(state.orchestrator.in_flight_operations().await?))
}

async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<IdempotencyRecord>, AppError> {
    Ok(Json(state.orchestrator.operation_record(&operation_id).await?))
}

async fn purge_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.purge_operation(&operation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reconcile_operation(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(operation_id): Path<String>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let outcome = state.orchestrator.reconcile(&operation_id, &ctx).await?;
    Ok(Json(outcome.into()))
}

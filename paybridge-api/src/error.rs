use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paybridge_orchestrator::OrchestratorError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub fn status_for(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::IdempotencyKeyReused(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        OrchestratorError::BusinessDecline { .. } => StatusCode::PAYMENT_REQUIRED,
        OrchestratorError::Undetermined { .. } => StatusCode::ACCEPTED,
        OrchestratorError::ConcurrentOperation(_) => StatusCode::CONFLICT,
        OrchestratorError::AdapterNotFound(_)
        | OrchestratorError::PaymentMethodNotFound(_)
        | OrchestratorError::OperationNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::TransientTransport { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "code": "BAD_REQUEST", "message": msg } })),
            )
                .into_response(),
            AppError::Orchestrator(err) => {
                let status = status_for(&err);
                let body = match &err {
                    // Not an error for the caller: the operation may have gone through
                    OrchestratorError::Undetermined { operation_id, envelope, .. } => json!({
                        "status": "UNDETERMINED",
                        "operation_id": operation_id,
                        "envelope": envelope,
                        "error": { "code": err.code(), "message": err.to_string() },
                    }),
                    OrchestratorError::BusinessDecline { code, message } => json!({
                        "error": {
                            "code": err.code(),
                            "message": message,
                            "gateway_error_code": code,
                        }
                    }),
                    OrchestratorError::Ledger(msg) => {
                        tracing::error!("Ledger failure: {}", msg);
                        json!({ "error": { "code": err.code(), "message": "Internal Server Error" } })
                    }
                    _ => json!({ "error": { "code": err.code(), "message": err.to_string() } }),
                };
                (status, Json(body)).into_response()
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": { "code": "INTERNAL_ERROR", "message": "Internal Server Error" } })),
                )
                    .into_response()
            }
        }
    }
}

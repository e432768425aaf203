use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use paybridge_core::{CallContext, Currency, OperationKind, OperationRequest, ResultEnvelope};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct OperationBody {
    pub operation_id: String,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub payment_method_id: Uuid,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl OperationBody {
    fn into_request(self, kind: OperationKind) -> Result<OperationRequest, AppError> {
        let currency = self
            .currency
            .as_deref()
            .map(str::parse::<Currency>)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        Ok(OperationRequest {
            operation_id: self.operation_id,
            account_id: self.account_id,
            payment_id: self.payment_id,
            payment_method_id: self.payment_method_id,
            amount: self.amount,
            currency,
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub payment_method_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/{kind}", post(execute_operation))
        .route("/v1/accounts/{account_id}/payments/{payment_id}", get(get_payment_info))
        .route(
            "/v1/accounts/{account_id}/payments/{payment_id}/refunds",
            get(get_refund_info),
        )
}

fn parse_kind(raw: &str) -> Result<OperationKind, AppError> {
    match raw {
        "authorize" => Ok(OperationKind::Authorize),
        "capture" => Ok(OperationKind::Capture),
        "charge" => Ok(OperationKind::Charge),
        "void" => Ok(OperationKind::Void),
        "refund" => Ok(OperationKind::Refund),
        other => Err(AppError::BadRequest(format!("Unknown operation: {}", other))),
    }
}

/// POST /v1/payments/{authorize|capture|charge|void|refund}
async fn execute_operation(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(kind): Path<String>,
    Json(body): Json<OperationBody>,
) -> Result<Json<ResultEnvelope>, AppError> {
    let kind = parse_kind(&kind)?;
    let request = body.into_request(kind)?;
    tracing::info!(operation_id = %request.operation_id, %kind, "Operation requested");

    let orchestrator = &state.orchestrator;
    let result = match kind {
        OperationKind::Authorize => orchestrator.authorize(request, &ctx).await,
        OperationKind::Capture => orchestrator.capture(request, &ctx).await,
        OperationKind::Charge => orchestrator.charge(request, &ctx).await,
        OperationKind::Void => orchestrator.void(request, &ctx).await,
        OperationKind::Refund => orchestrator.refund(request, &ctx).await,
    };
    state.metrics.observe(kind, &result);

    Ok(Json(result?))
}

async fn get_payment_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((account_id, payment_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<ResultEnvelope>, AppError> {
    let envelope = state
        .orchestrator
        .get_payment_info(account_id, payment_id, query.payment_method_id, &ctx)
        .await?;
    Ok(Json(envelope))
}

async fn get_refund_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((account_id, payment_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<Vec<ResultEnvelope>>, AppError> {
    let refunds = state
        .orchestrator
        .get_refund_info(account_id, payment_id, query.payment_method_id, &ctx)
        .await?;
    Ok(Json(refunds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_with_unknown_currency_rejected() {
        let body = OperationBody {
            operation_id: "op-1".into(),
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            amount: Some(Decimal::from(10)),
            currency: Some("XXX".into()),
        };
        assert!(matches!(body.into_request(OperationKind::Charge), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("void").unwrap(), OperationKind::Void);
        assert!(parse_kind("settle").is_err());
    }
}

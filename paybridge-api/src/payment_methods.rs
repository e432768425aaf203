use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use paybridge_core::{
    CallContext, PaymentMethodDescriptor, PaymentMethodDetail, PaymentMethodInfo, PaymentMethodProps,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct AddPaymentMethodRequest {
    /// Generated when absent
    pub payment_method_id: Option<Uuid>,
    pub plugin_name: String,
    #[serde(default)]
    pub set_default: bool,
    #[serde(flatten)]
    pub props: PaymentMethodProps,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub plugin: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub plugin_name: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/accounts/{account_id}/payment-methods",
            post(add_payment_method).get(list_payment_methods),
        )
        .route(
            "/v1/accounts/{account_id}/payment-methods/reset",
            post(reset_payment_methods),
        )
        .route(
            "/v1/accounts/{account_id}/payment-methods/{payment_method_id}",
            get(get_payment_method).delete(delete_payment_method),
        )
        .route(
            "/v1/accounts/{account_id}/payment-methods/{payment_method_id}/default",
            put(set_default_payment_method),
        )
}

async fn add_payment_method(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<AddPaymentMethodRequest>,
) -> Result<(StatusCode, Json<PaymentMethodDescriptor>), AppError> {
    let payment_method_id = req.payment_method_id.unwrap_or_else(Uuid::new_v4);
    let descriptor = state
        .orchestrator
        .add_payment_method(account_id, payment_method_id, &req.plugin_name, req.props, req.set_default, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn list_payment_methods(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PaymentMethodDescriptor>>, AppError> {
    let methods = state
        .orchestrator
        .list_payment_methods(account_id, query.plugin.as_deref(), query.refresh, &ctx)
        .await?;
    Ok(Json(methods))
}

async fn get_payment_method(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((account_id, payment_method_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PaymentMethodDetail>, AppError> {
    let detail = state
        .orchestrator
        .get_payment_method_detail(account_id, payment_method_id, &ctx)
        .await?;
    Ok(Json(detail))
}

async fn delete_payment_method(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((account_id, payment_method_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PaymentMethodDescriptor>, AppError> {
    let removed = state
        .orchestrator
        .delete_payment_method(account_id, payment_method_id, &ctx)
        .await?;
    Ok(Json(removed))
}

async fn set_default_payment_method(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((account_id, payment_method_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PaymentMethodDescriptor>, AppError> {
    let descriptor = state
        .orchestrator
        .set_default_payment_method(account_id, payment_method_id, &ctx)
        .await?;
    Ok(Json(descriptor))
}

async fn reset_payment_methods(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<Vec<PaymentMethodInfo>>, AppError> {
    let methods = state
        .orchestrator
        .reset_payment_methods(account_id, &req.plugin_name, &ctx)
        .await?;
    Ok(Json(methods))
}

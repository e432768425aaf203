use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use paybridge_core::{CallContext, HostedPageDescriptorFields, HostedPageFormDescriptor};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct HostedPageRequest {
    /// Falls back to the plugin of the account's default payment method
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub fields: HostedPageDescriptorFields,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/accounts/{account_id}/hosted-page", post(build_descriptor))
}

async fn build_descriptor(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<HostedPageRequest>,
) -> Result<Json<HostedPageFormDescriptor>, AppError> {
    let descriptor = state
        .orchestrator
        .build_hosted_page_descriptor(account_id, req.plugin_name.as_deref(), &req.fields, &ctx)
        .await?;
    Ok(Json(descriptor))
}

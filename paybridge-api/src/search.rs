use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use paybridge_core::CallContext;
use serde::Deserialize;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub offset: u64,
    pub limit: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/plugins/{plugin}/search/{target}", get(search))
}

/// GET /v1/plugins/{plugin}/search/{payments|refunds|payment-methods}
async fn search(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path((plugin, target)): Path<(String, String)>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, AppError> {
    let orchestrator = &state.orchestrator;
    tracing::debug!(plugin = %plugin, target = %target, offset = query.offset, "Search requested");

    let response = match target.as_str() {
        "payments" => Json(
            orchestrator
                .search_payments(&plugin, &query.key, query.offset, query.limit, &ctx)
                .await?,
        )
        .into_response(),
        "refunds" => Json(
            orchestrator
                .search_refunds(&plugin, &query.key, query.offset, query.limit, &ctx)
                .await?,
        )
        .into_response(),
        "payment-methods" => Json(
            orchestrator
                .search_payment_methods(&plugin, &query.key, query.offset, query.limit, &ctx)
                .await?,
        )
        .into_response(),
        other => return Err(AppError::BadRequest(format!("Unknown search target: {}", other))),
    };
    Ok(response)
}

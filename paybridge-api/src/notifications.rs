use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use paybridge_core::{CallContext, NormalizedNotification};

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/plugins/{plugin}/notifications", post(handle_notification))
}

/// POST /v1/plugins/{plugin}/notifications
/// The body is handed to the plugin untouched; only the plugin knows its format.
async fn handle_notification(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    Path(plugin): Path<String>,
    body: String,
) -> Result<Json<NormalizedNotification>, AppError> {
    tracing::info!(plugin = %plugin, bytes = body.len(), "Received gateway notification");

    let normalized = state
        .orchestrator
        .process_notification(&plugin, &body, &ctx)
        .await?;
    Ok(Json(normalized))
}

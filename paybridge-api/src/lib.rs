use axum::{
    http::{header::HeaderName, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod hosted_page;
pub mod metrics;
pub mod middleware;
pub mod notifications;
pub mod operations;
pub mod payment_methods;
pub mod payments;
pub mod search;
pub mod state;

pub use error::AppError;
pub use metrics::Metrics;
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            HeaderName::from_static("x-tenant-id"),
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-actor"),
        ]);

    // Everything under /v1 runs with a tenant-scoped call context
    let v1 = Router::new()
        .merge(payments::routes())
        .merge(search::routes())
        .merge(payment_methods::routes())
        .merge(hosted_page::routes())
        .merge(notifications::routes())
        .merge(operations::routes())
        .route_layer(axum::middleware::from_fn(middleware::tenant_context_middleware));

    Router::new()
        .merge(v1)
        .merge(metrics::routes())
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

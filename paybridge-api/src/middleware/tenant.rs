use axum::{extract::Request, middleware::Next, response::Response};
use paybridge_core::CallContext;
use uuid::Uuid;

use crate::error::AppError;

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const ACTOR_HEADER: &str = "X-Actor";

/// Builds the [`CallContext`] every orchestrated call is scoped to and stores it in
/// the request extensions.
pub async fn tenant_context_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let tenant_id = header_uuid(&req, TENANT_HEADER)?
        .ok_or_else(|| AppError::BadRequest(format!("{} header is required", TENANT_HEADER)))?;

    let mut ctx = CallContext::new(tenant_id);
    if let Some(request_id) = header_uuid(&req, REQUEST_ID_HEADER)? {
        ctx = ctx.with_request_id(request_id);
    }
    if let Some(actor) = req.headers().get(ACTOR_HEADER).and_then(|h| h.to_str().ok()) {
        ctx = ctx.with_actor(actor);
    }

    tracing::debug!(tenant_id = %ctx.tenant_id, request_id = %ctx.request_id, "Call context attached");
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

fn header_uuid(req: &Request, name: &str) -> Result<Option<Uuid>, AppError> {
    match req.headers().get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .filter(|id| !id.is_nil())
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("{} must be a UUID", name))),
    }
}

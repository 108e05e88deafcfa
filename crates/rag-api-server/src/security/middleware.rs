use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::debug;

use crate::utils::error::ApiError;

/// Request-scoped logging middleware. Tenant and resource authorization
/// happen per-handler via `WorkspaceGuard` — this layer only attaches
/// connection metadata to the tracing span so request logs can be
/// correlated with a client address.
pub async fn request_context_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    debug!(client_ip = %addr.ip(), path = %request.uri().path(), "incoming request");
    Ok(next.run(request).await)
}

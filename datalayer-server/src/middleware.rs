use crate::{ApiError, AppState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::time::Instant;
use tracing::{info, warn};

/// Reject requests without a valid `Authorization: Bearer` header.
///
/// Validation may refresh the token from the secret source, which is blocking
/// I/O, so it runs on the blocking pool.
pub(crate) async fn require_bearer(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let tokens = state.tokens.clone();
    let verdict = tokio::task::spawn_blocking(move || tokens.validate(presented.as_deref())).await;

    match verdict {
        Ok(Ok(())) => next.run(request).await,
        Ok(Err(e)) => {
            warn!(path = %request.uri().path(), error = %e, "request rejected by auth");
            ApiError::from(e).into_response()
        }
        Err(e) => ApiError::Internal(format!("auth task failed: {e}")).into_response(),
    }
}

/// One log line per request: method, path, status, latency.
pub(crate) async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

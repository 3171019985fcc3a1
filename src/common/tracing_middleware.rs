//! Request tracing middleware shared by the master and worker routers
//!
//! Every request gets an `X-Request-ID` (propagated when the caller sent
//! one) and a completion log line with status and duration.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Liveness and heartbeat traffic is logged at debug to keep the logs readable.
fn is_chatty(path: &str) -> bool {
    path == "/alive" || path == "/current_leader" || path.starts_with("/heartbeat/")
}

pub async fn request_tracing_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let duration_ms = duration.as_millis() as u64;
    let code = status.as_u16();
    match (status.is_success(), is_chatty(&path)) {
        (true, true) => debug!(%request_id, %method, %path, code, duration_ms, "Request completed"),
        (true, false) => info!(%request_id, %method, %path, code, duration_ms, "Request completed"),
        (false, _) => {
            let side = if status.is_client_error() { "client" } else { "server" };
            warn!(%request_id, %method, %path, code, duration_ms, side, "Request failed")
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();

        assert!(Uuid::parse_str(&id1).is_ok());
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = Router::new()
            .route("/alive", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(request_tracing_middleware));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alive")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "req-42"
        );
    }
}

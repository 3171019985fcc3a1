//! HTTP API of a worker: raw chunk put/get/delete

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Result;
use crate::master::worker_client::CHUNK_CHECKSUM_HEADER;
use crate::worker::store::ChunkDirectory;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Clone)]
pub struct WorkerState {
    pub store: Arc<ChunkDirectory>,
    pub worker_id: String,
}

pub fn create_router(state: WorkerState, max_chunk_bytes: usize) -> Router {
    Router::new()
        .route("/alive", get(alive))
        .route("/status", get(status))
        .route("/chunks/:chunk_id", post(put_chunk).get(get_chunk))
        .route("/chunks/:chunk_id/delete", post(delete_chunk))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_chunk_bytes))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn alive(State(state): State<WorkerState>) -> impl IntoResponse {
    Json(json!({ "status": "alive", "worker_id": state.worker_id }))
}

async fn status(State(state): State<WorkerState>) -> Result<impl IntoResponse> {
    let usage = state.store.usage().await?;
    Ok(Json(json!({
        "worker_id": state.worker_id,
        "chunks": usage.chunks,
        "bytes": usage.bytes,
    })))
}

async fn put_chunk(
    State(state): State<WorkerState>,
    Path(chunk_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let expected = headers
        .get(CHUNK_CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok());
    state.store.put(&chunk_id, &body, expected).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "stored", "chunk_id": chunk_id, "size": body.len() })),
    ))
}

async fn get_chunk(
    State(state): State<WorkerState>,
    Path(chunk_id): Path<String>,
) -> Result<impl IntoResponse> {
    let data = state.store.get(&chunk_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

async fn delete_chunk(
    State(state): State<WorkerState>,
    Path(chunk_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.store.delete(&chunk_id).await?;
    Ok(Json(json!({ "status": "deleted", "chunk_id": chunk_id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::blake3_hash;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn app(dir: &std::path::Path, limit: usize) -> Router {
        let store = Arc::new(ChunkDirectory::open(dir).await.unwrap());
        create_router(
            WorkerState {
                store,
                worker_id: "w1".into(),
            },
            limit,
        )
    }

    fn post_chunk(uri: &str, data: &'static [u8], checksum: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(sum) = checksum {
            builder = builder.header(CHUNK_CHECKSUM_HEADER, sum);
        }
        builder.body(Body::from(data)).unwrap()
    }

    #[tokio::test]
    async fn test_chunk_lifecycle() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 1024).await;

        let response = app
            .clone()
            .oneshot(post_chunk("/chunks/f1_chunk_1", b"abc", Some(blake3_hash(b"abc"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/chunks/f1_chunk_1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abc");

        let response = app
            .clone()
            .oneshot(post_chunk("/chunks/f1_chunk_1/delete", b"", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_chunk("/chunks/f1_chunk_1/delete", b"", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_checksum_and_oversized_body() {
        let dir = tempdir().unwrap();
        let app = app(dir.path(), 8).await;

        let response = app
            .clone()
            .oneshot(post_chunk("/chunks/c1", b"abc", Some(blake3_hash(b"xyz"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_chunk("/chunks/c2", b"0123456789", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}

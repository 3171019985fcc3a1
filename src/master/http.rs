//! HTTP API of a master node
//!
//! Peer-facing endpoints (`/alive`, `/current_leader`, `/leader`,
//! `/sync_metadata`, `/all_metadata`), worker-facing `/heartbeat/:worker_id`,
//! and the client surface (`/files`, `/metadata`, `/chunks`).

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use crate::master::metadata::FileRecord;
use crate::master::peer_client::{
    AnnouncementAck, LeaderAnnouncement, LeaderView, MetadataDump, SyncRequest,
};
use crate::master::state::{CommitRequest, MasterState, StatusReport};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveWorkers {
    pub active_workers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub worker_url: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
}

/// Creates the HTTP router with every master endpoint.
pub fn create_router(state: MasterState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        // Cluster membership
        .route("/alive", get(alive))
        .route("/current_leader", get(current_leader))
        .route("/leader", post(announce_leader))
        .route("/heartbeat/:worker_id", post(heartbeat))
        .route("/workers/active", get(active_workers))
        // Metadata
        .route("/metadata", post(commit_metadata))
        .route("/metadata/:file_id", get(get_metadata))
        .route("/sync_metadata", post(sync_metadata))
        .route("/all_metadata", get(all_metadata))
        .route("/chunks/:file_id/:chunk_id", get(locate_chunk))
        // Files
        .route("/files", post(upload_file).get(list_files))
        .route("/files/:file_id", axum::routing::delete(delete_file))
        // Introspection
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn alive() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

async fn current_leader(State(state): State<MasterState>) -> Json<LeaderView> {
    Json(state.elector.view())
}

async fn announce_leader(
    State(state): State<MasterState>,
    Json(announcement): Json<LeaderAnnouncement>,
) -> Json<AnnouncementAck> {
    let before = state.elector.view();
    let ack = state.elector.handle_announcement(&announcement);
    if ack.accepted && before.leader != ack.leader {
        tokio::spawn(async move { state.resync_after_change(&before).await });
    }
    Json(ack)
}

async fn heartbeat(
    State(state): State<MasterState>,
    Path(worker_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse> {
    if request.url.trim().is_empty() {
        return Err(Error::InvalidRecord("url is required".into()));
    }
    let node = state.registry.heartbeat(&worker_id, &request.url)?;
    Ok(Json(json!({ "status": "ok", "worker_id": node.worker_id })))
}

async fn active_workers(State(state): State<MasterState>) -> Json<ActiveWorkers> {
    Json(ActiveWorkers {
        active_workers: state
            .registry
            .list_active()
            .into_iter()
            .map(|w| w.worker_id)
            .collect(),
    })
}

async fn commit_metadata(
    State(state): State<MasterState>,
    Json(request): Json<CommitRequest>,
) -> Result<impl IntoResponse> {
    let record = state.commit(request)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_metadata(
    State(state): State<MasterState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.store.get(&file_id)?))
}

async fn sync_metadata(
    State(state): State<MasterState>,
    Json(request): Json<SyncRequest>,
) -> Result<impl IntoResponse> {
    let applied = state.accept_sync(&request.record)?;
    Ok(Json(json!({ "status": "ok", "applied": applied })))
}

async fn all_metadata(State(state): State<MasterState>) -> Result<Json<MetadataDump>> {
    Ok(Json(MetadataDump {
        records: state.store.list_all(true)?,
    }))
}

async fn locate_chunk(
    State(state): State<MasterState>,
    Path((file_id, chunk_id)): Path<(String, String)>,
) -> Result<Json<ChunkLocation>> {
    Ok(Json(ChunkLocation {
        worker_url: state.locate_chunk(&file_id, &chunk_id)?,
    }))
}

async fn upload_file(
    State(state): State<MasterState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let record = state.upload(&params.name, body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_files(
    State(state): State<MasterState>,
    Query(params): Query<ListParams>,
) -> Result<Json<FileListing>> {
    Ok(Json(FileListing {
        files: state.store.list_all(params.include_deleted)?,
    }))
}

async fn delete_file(
    State(state): State<MasterState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.delete_file(&file_id).await?))
}

async fn status(State(state): State<MasterState>) -> Result<Json<StatusReport>> {
    Ok(Json(state.status()?))
}

async fn metrics(State(state): State<MasterState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(&state.gauges()),
    )
}

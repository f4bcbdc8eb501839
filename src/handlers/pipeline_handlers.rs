//! Handlers for the deploy queue, repository deployment, and storage
//! housekeeping (tier movement, batch deletion).

use crate::{
    errors::{AppError, PipelineError},
    models::batch::BatchResponse,
    models::deploy::DeployRequestFile,
    models::queue::QueueAction,
    services::{AppState, queue_service::QueueEntryRef},
};
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;

/// `GET /deploy-queue/{bucket}` — the flagged-path document for a bucket.
pub async fn get_queue(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let doc = state.queue.get(&bucket).await?;
    Ok(Json(doc))
}

/// Request body for `POST /deploy-queue`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMutationRequest {
    pub bucket: String,
    pub entries: Vec<QueueEntryRef>,
    pub action: QueueAction,
}

/// `POST /deploy-queue` — flag or clear entries against one bucket's queue.
pub async fn mutate_queue(
    State(state): State<AppState>,
    Json(req): Json<QueueMutationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .queue
        .mutate(&req.bucket, req.entries, req.action)
        .await?;
    Ok(Json(outcome))
}

/// Request body for `POST /deploy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub bucket: String,
    pub files: Vec<DeployRequestFile>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /deploy` — build one atomic commit from the requested objects.
pub async fn deploy(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Some(deploy) = state.deploy.as_ref() else {
        return Err(PipelineError::Configuration(
            "no repository target configured; set a token and repo slug".into(),
        )
        .into());
    };

    let commit = deploy.deploy(&req.bucket, req.files, req.message).await?;
    Ok(Json(commit))
}

/// Request body for `POST /objects/move`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub bucket: String,
    pub path: String,
    pub target_bucket: String,
}

/// `POST /objects/move` — copy-verify-delete between storage tiers.
pub async fn move_object(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let moved = state
        .approvals
        .move_object(&req.bucket, &req.path, &req.target_bucket)
        .await?;
    Ok(Json(moved))
}

/// Request body for `POST /objects/delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub bucket: String,
    pub paths: Vec<String>,
}

/// `POST /objects/delete` — per-path tolerant batch deletion.
pub async fn delete_objects(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let results = state.approvals.delete_many(&req.bucket, req.paths).await;
    Ok(Json(BatchResponse::new(results)))
}

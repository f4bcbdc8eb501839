//! Handlers for the draft registry and approval transition.

use crate::{
    errors::AppError,
    models::batch::BatchResponse,
    services::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

const DEFAULT_LIST_LIMIT: usize = 500;
const MAX_LIST_LIMIT: usize = 5000;

/// Query params accepted by `GET /drafts`.
#[derive(Debug, Deserialize)]
pub struct ListDraftsQuery {
    pub bucket: String,
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /drafts?bucket=...&prefix=...&limit=...` — list draft objects with
/// their derived approval status.
pub async fn list_drafts(
    State(state): State<AppState>,
    Query(q): Query<ListDraftsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let prefix = q.prefix.unwrap_or_else(|| state.draft_prefix.clone());
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let drafts = state.registry.list_drafts(&q.bucket, &prefix, limit).await?;
    Ok(Json(serde_json::json!({
        "bucket": q.bucket,
        "prefix": prefix,
        "count": drafts.len(),
        "drafts": drafts,
    })))
}

/// Request body for `POST /approve`.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub bucket: String,
    pub paths: Vec<String>,
}

/// `POST /approve` — copy each draft into the deployed area. Per-item
/// results, one per requested path, in request order.
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let results = state.approvals.approve(&req.bucket, req.paths).await;
    Ok(Json(BatchResponse::new(results)))
}

//! Defines routes for the dashboard-facing pipeline API.
//!
//! ## Structure
//! - **Pipeline endpoints**
//!   - `GET  /drafts` — list drafts with derived approval status
//!   - `POST /approve` — copy drafts into the deployed area
//!   - `GET  /deploy-queue/{bucket}` — read the flagged-path document
//!   - `POST /deploy-queue` — flag/clear queue entries
//!   - `POST /deploy` — build one atomic repository commit
//!
//! - **Storage endpoints**
//!   - `PUT  /objects/{bucket}/{*key}` — stream-upload a draft
//!   - `GET  /objects/{bucket}/{*key}` — stream-download an object
//!   - `POST /objects/move` — move an object between storage tiers
//!   - `POST /objects/delete` — batch-delete draft objects
//!
//! The wildcard `*key` allows nested keys like `audio/es/cat_v002.mp3`.

use crate::{
    handlers::{
        draft_handlers::{approve, list_drafts},
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, upload_object},
        pipeline_handlers::{delete_objects, deploy, get_queue, move_object, mutate_queue},
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for all pipeline routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // pipeline endpoints
        .route("/drafts", get(list_drafts))
        .route("/approve", post(approve))
        .route("/deploy-queue/{bucket}", get(get_queue))
        .route("/deploy-queue", post(mutate_queue))
        .route("/deploy", post(deploy))
        // storage endpoints
        .route("/objects/move", post(move_object))
        .route("/objects/delete", post(delete_objects))
        .route(
            "/objects/{bucket}/{*key}",
            put(upload_object).get(get_object),
        )
}

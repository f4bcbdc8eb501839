//! Service layer: the storage backend plus the pipeline components built on
//! top of it. Each is constructed once at startup and injected into the
//! router state.

pub mod approval_service;
pub mod deploy_service;
pub mod github_client;
pub mod queue_service;
pub mod registry_service;
pub mod storage_service;

use approval_service::ApprovalService;
use deploy_service::DeployService;
use queue_service::QueueService;
use registry_service::RegistryService;
use std::sync::Arc;
use storage_service::StorageService;

/// Shared handler state. `deploy` is absent when no repository target is
/// configured; the deploy endpoint reports that as a configuration error.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub registry: Arc<RegistryService>,
    pub approvals: Arc<ApprovalService>,
    pub queue: Arc<QueueService>,
    pub deploy: Option<Arc<DeployService>>,
    /// Default listing prefix for the draft area.
    pub draft_prefix: String,
}

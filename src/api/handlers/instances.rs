//! Instance lifecycle handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::db::ALL_OWNERS;
use crate::instance::Instance;
use crate::LifecycleManager;
use vpsman_protocol::{
    CreateInstanceRequest, CredentialRotation, InstanceStats, InstanceSummary, LifecycleOutcome,
    LogTail,
};

/// Lines returned by the logs endpoint when none are requested.
const DEFAULT_LOG_LINES: usize = 50;

/// Query for instance creation.
#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    /// Skip the per-owner instance limit.
    #[serde(default)]
    pub privileged: bool,
}

/// Query for listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Owner to filter by; everyone when absent.
    pub owner: Option<String>,
}

/// Query for log tailing.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Number of trailing lines.
    pub lines: Option<usize>,
}

/// Run a lifecycle operation on its own task.
///
/// Axum drops the handler future when the client disconnects or the request
/// times out. The spawned operation keeps running, so a launched hypervisor
/// is always recorded or stopped again.
async fn detached<T, F, Fut>(manager: &Arc<LifecycleManager>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(Arc<LifecycleManager>) -> Fut,
    Fut: Future<Output = crate::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(op(Arc::clone(manager)))
        .await
        .map_err(|e| ApiError::internal(format!("lifecycle task failed: {e}")))?
        .map_err(ApiError::from)
}

/// POST /api/v1/instances - Create an instance.
pub async fn create_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Query(query): Query<CreateQuery>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<InstanceSummary>), ApiError> {
    manager.check_capacity(&req.owner_id, query.privileged)?;
    let summary = detached(&manager, |m| async move { m.create(&req).await }).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /api/v1/instances - List instances.
pub async fn list_instances(
    State(manager): State<Arc<LifecycleManager>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let owner = query.owner.as_deref().unwrap_or(ALL_OWNERS);
    Ok(Json(manager.list_by_owner(owner)?))
}

/// GET /api/v1/instances/:id - Get one instance.
pub async fn get_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    Ok(Json(manager.get(&id)?))
}

/// POST /api/v1/instances/:id/start - Start an instance.
pub async fn start_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleOutcome>, ApiError> {
    let outcome = detached(&manager, |m| async move { m.start(&id).await }).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/instances/:id/stop - Stop an instance.
pub async fn stop_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleOutcome>, ApiError> {
    let outcome = detached(&manager, |m| async move { m.stop(&id).await }).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/instances/:id/restart - Restart an instance.
pub async fn restart_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<LifecycleOutcome>, ApiError> {
    let outcome = detached(&manager, |m| async move { m.restart(&id).await }).await?;
    Ok(Json(outcome))
}

/// DELETE /api/v1/instances/:id - Delete an instance and its files.
pub async fn delete_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    detached(&manager, |m| async move { m.delete(&id).await }).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/instances/:id/credential - Rotate the login secret.
pub async fn rotate_credential(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<CredentialRotation>, ApiError> {
    let rotation = detached(&manager, |m| async move { m.rotate_credential(&id).await }).await?;
    Ok(Json(rotation))
}

/// GET /api/v1/instances/:id/logs - Tail the console log.
pub async fn tail_logs(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogTail>, ApiError> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    Ok(Json(manager.tail_log(&id, lines).await?))
}

/// GET /api/v1/instances/:id/stats - Resource usage.
pub async fn instance_stats(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
) -> Result<Json<InstanceStats>, ApiError> {
    Ok(Json(manager.instance_stats(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_detached_operation_outlives_dropped_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            vm_dir: dir.path().join("vms"),
            ..ManagerConfig::default()
        };
        let manager = Arc::new(LifecycleManager::open(config).await.unwrap());

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let request = detached(&manager, move |_| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        // The client gives up long before the operation is done.
        assert!(tokio::time::timeout(Duration::from_millis(10), request)
            .await
            .is_err());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }
}

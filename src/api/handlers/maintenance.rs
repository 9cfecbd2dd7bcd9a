//! Maintenance and reporting handlers.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::LifecycleManager;
use vpsman_protocol::{DependencyCheck, SweepReport, UsageReport};

/// POST /api/v1/maintenance/sweep - Remove orphaned instance files.
pub async fn sweep(
    State(manager): State<Arc<LifecycleManager>>,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(manager.sweep_orphans().await?))
}

/// GET /api/v1/usage - Totals and counters.
pub async fn usage(
    State(manager): State<Arc<LifecycleManager>>,
) -> Result<Json<UsageReport>, ApiError> {
    Ok(Json(manager.usage_report().await?))
}

/// GET /api/v1/host/check - Host dependency check.
pub async fn host_check(State(manager): State<Arc<LifecycleManager>>) -> Json<Vec<DependencyCheck>> {
    Json(manager.host_check().await)
}

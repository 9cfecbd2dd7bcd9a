//! HTTP API over the lifecycle manager.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! vpsman serve --listen 127.0.0.1:8080
//!
//! # Create an instance
//! curl -X POST http://localhost:8080/api/v1/instances \
//!   -H "Content-Type: application/json" \
//!   -d '{"owner_id": "alice", "memory_mb": 1024, "cpu_count": 2, "disk_size": "20G"}'
//! ```

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::LifecycleManager;

/// Limit for every route except creation, which may include an image download.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Create the API router with all endpoints.
pub fn create_router(manager: Arc<LifecycleManager>) -> Router {
    let health_route = Router::new().route("/health", get(handlers::health::health));

    let creation_routes = Router::new().route(
        "/",
        post(handlers::instances::create_instance).get(handlers::instances::list_instances),
    );

    let instance_routes = Router::new()
        .route(
            "/:id",
            get(handlers::instances::get_instance).delete(handlers::instances::delete_instance),
        )
        .route("/:id/start", post(handlers::instances::start_instance))
        .route("/:id/stop", post(handlers::instances::stop_instance))
        .route("/:id/restart", post(handlers::instances::restart_instance))
        .route("/:id/credential", post(handlers::instances::rotate_credential))
        .route("/:id/logs", get(handlers::instances::tail_logs))
        .route("/:id/stats", get(handlers::instances::instance_stats))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let maintenance_routes = Router::new()
        .route("/maintenance/sweep", post(handlers::maintenance::sweep))
        .route("/usage", get(handlers::maintenance::usage))
        .route("/host/check", get(handlers::maintenance::host_check))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let api_v1 = Router::new()
        .nest(
            "/instances",
            Router::new().merge(creation_routes).merge(instance_routes),
        )
        .merge(maintenance_routes);

    // Local front ends only; deployments behind a proxy configure their own.
    let cors = CorsLayer::new()
        .allow_origin([
            axum::http::HeaderValue::from_static("http://localhost:8080"),
            axum::http::HeaderValue::from_static("http://127.0.0.1:8080"),
            axum::http::HeaderValue::from_static("http://localhost:3000"),
            axum::http::HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .merge(health_route)
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use vpsman_protocol::{ErrorBody, ErrorKind, UsageReport};

    async fn router() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            vm_dir: dir.path().join("vms"),
            ..ManagerConfig::default()
        };
        let manager = LifecycleManager::open(config).await.unwrap();
        (dir, create_router(Arc::new(manager)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = router().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_instance_is_404() {
        let (_dir, app) = router().await;
        for (method, uri) in [
            ("GET", "/api/v1/instances/vps_0000000000000000"),
            ("POST", "/api/v1/instances/vps_0000000000000000/start"),
            ("DELETE", "/api/v1/instances/vps_0000000000000000"),
            ("GET", "/api/v1/instances/vps_0000000000000000/logs?lines=5"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
            let err: ErrorBody = serde_json::from_slice(&body).unwrap();
            assert_eq!(err.code, ErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn test_list_and_usage_on_empty_registry() {
        let (_dir, app) = router().await;

        let (status, body) = send(&app, "GET", "/api/v1/instances?owner=alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");

        let (status, body) = send(&app, "GET", "/api/v1/usage", None).await;
        assert_eq!(status, StatusCode::OK);
        let usage: UsageReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(usage.total_instances, 0);
        assert_eq!(usage.counters, Default::default());
        assert!(usage.host.memory_total_bytes > 0);
    }

    #[tokio::test]
    async fn test_invalid_create_is_400() {
        let (_dir, app) = router().await;
        let body = r#"{"owner_id":"alice","memory_mb":64,"cpu_count":1,"disk_size":"10G"}"#;
        let (status, body) = send(&app, "POST", "/api/v1/instances", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code, ErrorKind::InvalidRequest);
        assert!(err.error.contains("memory"));
    }

    #[tokio::test]
    async fn test_sweep_on_empty_dir() {
        let (_dir, app) = router().await;
        let (status, body) = send(&app, "POST", "/api/v1/maintenance/sweep", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["bytes_freed"], 0);
    }
}

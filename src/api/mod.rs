//! Historian HTTP API
//!
//! HTTP and WebSocket layer, built with Axum.
//!
//! # Endpoints
//!
//! ## Range
//! - `GET /range/*topic?start=&end=&decimate=` - Recorded messages as NDJSON
//!
//! ## Live
//! - `GET /live/*topic` - WebSocket stream of throttled live frames
//!
//! ## Topics
//! - `GET /topics` - Topics and types known to the message bus
//!
//! ## Health
//! - `GET /healthz` - Liveness probe
//! - `GET /health` - Component status
//!
//! # Example
//!
//! ```rust,no_run
//! use historian::api::{serve, ApiConfig, AppState};
//! use historian::bus::{LocalBus, MessageBus};
//! use historian::catalog::{CatalogConfig, FileCatalog};
//! use historian::live::{LiveConfig, LiveRegistry};
//! use historian::workers::{PoolConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new(0));
//!     let catalog = Arc::new(FileCatalog::start(CatalogConfig::new("./bags")).await);
//!     let pool = WorkerPool::start(PoolConfig::default());
//!     let live = LiveRegistry::start(Arc::clone(&bus), LiveConfig::default());
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(catalog, pool.clone(), live, bus, config.clone());
//!     serve(state, &config).await?;
//!
//!     pool.drain().await;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/health", get(routes::health::full_health))
        .route("/topics", get(routes::topics::list_topics))
        .route("/range/*topic", get(routes::range::stream_range))
        .route("/live/*topic", get(routes::live::live_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Start the API server
///
/// Returns once a shutdown signal has been received and open connections
/// have finished.
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Historian listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, MessageBus};
    use crate::catalog::{CatalogConfig, FileCatalog};
    use crate::live::{LiveConfig, LiveRegistry};
    use crate::storage::fixtures::{write_log, FixtureMessage};
    use crate::workers::{PoolConfig, WorkerPool};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    struct TestApp {
        router: Router,
        pool: WorkerPool,
        _dir: tempfile::TempDir,
    }

    async fn create_test_app(files: &[(&str, Vec<FixtureMessage>)]) -> TestApp {
        let dir = tempdir().unwrap();
        for (name, messages) in files {
            write_log(&dir.path().join(name), messages);
        }

        let bus = Arc::new(LocalBus::new(0));
        bus.advertise("/odom", "nav_msgs/msg/Odometry");
        let bus: Arc<dyn MessageBus> = bus;

        let mut catalog_config = CatalogConfig::new(dir.path());
        catalog_config.watch = false;
        let catalog = Arc::new(FileCatalog::start(catalog_config).await);

        let pool = WorkerPool::start(PoolConfig {
            size: 2,
            task_timeout: Duration::from_secs(10),
            ..PoolConfig::default()
        });
        let live = LiveRegistry::start(Arc::clone(&bus), LiveConfig::default());
        let mut config = ApiConfig::default();
        config.max_range_ms = 60 * 60 * 1000;

        let state = AppState::new(catalog, pool.clone(), live, bus, config);
        TestApp {
            router: build_router(state),
            pool,
            _dir: dir,
        }
    }

    fn series(topic: &'static str, times: impl Iterator<Item = u64>) -> Vec<FixtureMessage> {
        times.map(|t| FixtureMessage::new(topic, t)).collect()
    }

    async fn get(app: &TestApp, uri: &str) -> Response {
        app.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn error_message(response: Response) -> String {
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        json["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = create_test_app(&[]).await;

        let response = get(&app, "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ok");
    }

    #[tokio::test]
    async fn test_health_reports_components() {
        let app = create_test_app(&[("a.mcap", series("/odom", 0..5))]).await;

        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["files"], 1);
        assert_eq!(json["pool"]["size"], 2);
        assert_eq!(json["live"]["rooms"], 0);
    }

    #[tokio::test]
    async fn test_topics() {
        let app = create_test_app(&[]).await;

        let response = get(&app, "/topics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"topic": "/odom", "type": "nav_msgs/msg/Odometry"}])
        );
    }

    #[tokio::test]
    async fn test_range_validation() {
        let app = create_test_app(&[("a.mcap", series("/odom", 0..5))]).await;

        for uri in [
            "/range/odom",
            "/range/odom?start=10",
            "/range/odom?start=abc&end=20",
            "/range/odom?start=20&end=20",
            "/range/odom?start=30&end=20",
            "/range/odom?start=0&end=20&decimate=0",
        ] {
            let response = get(&app, uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        let response = get(&app, "/range/odom?start=0&end=20").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_range_window_limit() {
        let app = create_test_app(&[("a.mcap", series("/odom", 0..5))]).await;

        let response = get(&app, "/range/odom?start=0&end=3600001").await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(error_message(response).await, "window too large");

        let response = get(&app, "/range/odom?start=0&end=3600000").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_range_without_files() {
        let app = create_test_app(&[]).await;

        let response = get(&app, "/range/odom?start=0&end=100").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_message(response).await, "no log files");
    }

    #[tokio::test]
    async fn test_range_unknown_topic_is_not_scheduled() {
        let app = create_test_app(&[("a.mcap", series("/odom", 0..5))]).await;

        let response = get(&app, "/range/scan?start=0&end=100").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_message(response).await, "topic not found");

        let stats = app.pool.stats().await.unwrap();
        assert_eq!(stats.completed + stats.failed + stats.cancelled, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_range_streams_ndjson_across_files() {
        let app = create_test_app(&[
            ("log_a.mcap", series("/robot/odom", (0..100).step_by(10))),
            ("log_b.mcap", series("/robot/odom", (100..200).step_by(10))),
            ("log_c.mcap", series("/robot/odom", (200..300).step_by(10))),
        ])
        .await;

        let response = get(&app, "/range/robot/odom?start=50&end=250").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            routes::range::NDJSON
        );

        let body = body_string(response).await;
        let times: Vec<i64> = body
            .lines()
            .map(|line| {
                let record: serde_json::Value = serde_json::from_str(line).unwrap();
                assert_eq!(record["topic"], "/robot/odom");
                record["t"].as_i64().unwrap()
            })
            .collect();

        // Newest file first
        let mut expected: Vec<i64> = (200..=250).step_by(10).collect();
        expected.extend((100..200).step_by(10));
        expected.extend((50..100).step_by(10));
        assert_eq!(times, expected);
    }

    #[tokio::test]
    async fn test_range_decimation() {
        let app = create_test_app(&[("a.mcap", series("/odom", 0..30))]).await;

        let response = get(&app, "/range/odom?start=0&end=29&decimate=10").await;
        let body = body_string(response).await;
        let times: Vec<i64> = body
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["t"].as_i64().unwrap())
            .collect();
        assert_eq!(times, vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn test_live_requires_upgrade() {
        let app = create_test_app(&[]).await;

        let response = get(&app, "/live/odom").await;
        assert!(response.status().is_client_error());
    }
}

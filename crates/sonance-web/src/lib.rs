mod moves;
pub mod state;
mod topology;

use std::future::Future;
use std::path::{Path, PathBuf};

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::info;

use crate::state::AppState;

pub const DEFAULT_WEB_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_STATIC_DIR: &str = "web/dist";

/// Gateway settings from `SONANCE_WEB_ADDR` and `SONANCE_WEB_STATIC_DIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub addr: String,
    /// Built SPA served for every non-API path.
    pub static_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_WEB_ADDR.to_string(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            addr: std::env::var("SONANCE_WEB_ADDR").unwrap_or(defaults.addr),
            static_dir: std::env::var("SONANCE_WEB_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
        }
    }
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        // Observability
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        // Topology endpoints
        .route("/api/topology", get(topology::get_topology))
        .route("/api/topology/debug", get(topology::get_topology_debug))
        .route("/api/topology/ws", get(topology::topology_ws))
        // Moves
        .route("/api/move", post(moves::post_move))
        .route("/api/refresh", post(moves::post_refresh))
        // Serve the SPA (static files)
        .fallback_service(
            ServeDir::new(static_dir)
                .append_index_html_on_directories(true)
                .fallback(ServeFile::new(static_dir.join("index.html"))),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the global Prometheus recorder. Call once, before the engine
/// starts, so its first refresh is already recorded.
pub fn install_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Prometheus recorder install failed: {e}").into())
}

/// `GET /metrics`: renders Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// `GET /health`: reports whether the group engine is still running.
async fn health_handler(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let engine = if state.engine.is_running() {
        "running"
    } else {
        "stopped"
    };
    axum::Json(serde_json::json!({"status": "ok", "engine": engine}))
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

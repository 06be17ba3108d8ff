use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::progress::ProgressBoard;

/// Serves the live progress board while a run is in flight
pub struct HealthServer {
    port: u16,
    board: Arc<ProgressBoard>,
}

impl HealthServer {
    pub fn new(port: u16, board: Arc<ProgressBoard>) -> Self {
        Self { port, board }
    }

    pub fn router(board: Arc<ProgressBoard>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ready", get(ready_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(board)
    }

    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = Self::router(self.board);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("🏥 Status server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await.map_err(|e| {
            error!("Status server error: {}", e);
            e.into()
        })
    }
}

async fn health_handler(State(board): State<Arc<ProgressBoard>>) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = board.snapshot();

    let health = json!({
        "status": "healthy",
        "service": "pagesweep",
        "phase": snapshot.phase,
        "pass": snapshot.pass,
        "progress": {
            "units_completed": snapshot.units_completed,
            "units_total": snapshot.units_total,
            "records": snapshot.records_so_far,
            "last_unit": snapshot.last_unit,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    (StatusCode::OK, Json(health))
}

async fn metrics_handler(State(board): State<Arc<ProgressBoard>>) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = board.snapshot();

    let metrics = json!({
        "units_completed": snapshot.units_completed,
        "units_total": snapshot.units_total,
        "records_so_far": snapshot.records_so_far,
        "gaps": snapshot.gaps,
        "elapsed_secs": snapshot.elapsed_secs,
        "finished": snapshot.finished,
    });

    (StatusCode::OK, Json(metrics))
}

async fn ready_handler(State(board): State<Arc<ProgressBoard>>) -> StatusCode {
    // ready once the run has left startup
    if board.snapshot().started { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

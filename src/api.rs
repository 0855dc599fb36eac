//! HTTP server for health, status and metrics endpoints
//!
//! - GET /health    - relay status (JSON)
//! - GET /healthz   - liveness probe
//! - GET /readyz    - readiness probe (after the first completed round)
//! - GET /metrics   - Prometheus metrics
//! - GET /escalated - intents awaiting operator intervention (JSON)

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::relay::{EscalatedIntent, RoundReport, SharedStatus};
use crate::types::RoundState;

#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub relay_key: String,
    pub source_chain: u64,
    pub dest_chain: u64,
    pub state: RoundState,
    pub checkpoint: u64,
    pub scan_cursor: u64,
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    pub skipped_ticks: u64,
    pub deferred: usize,
    pub escalated: usize,
    pub last_round: Option<RoundReport>,
    pub last_error: Option<String>,
    pub last_round_at: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let s = state.status.read().await;
    // Escalated intents need an operator
    let status = if !s.escalated.is_empty() {
        "degraded"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        relay_key: s.relay_key.clone(),
        source_chain: s.source_chain,
        dest_chain: s.dest_chain,
        state: s.state,
        checkpoint: s.checkpoint,
        scan_cursor: s.scan_cursor,
        rounds_completed: s.rounds_completed,
        rounds_failed: s.rounds_failed,
        skipped_ticks: s.skipped_ticks,
        deferred: s.deferred,
        escalated: s.escalated.len(),
        last_round: s.last_round.clone(),
        last_error: s.last_error.clone(),
        last_round_at: s.last_round_at,
        uptime_secs: (Utc::now() - s.started_at).num_seconds(),
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness probe
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.status.read().await.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn escalated(State(state): State<AppState>) -> Json<Vec<EscalatedIntent>> {
    Json(state.status.read().await.escalated.clone())
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/escalated", get(escalated))
        .with_state(AppState { status })
}

/// Start the HTTP server
pub async fn start_server(bind_address: &str, port: u16, status: SharedStatus) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("API server listening on {}", addr);
    info!("  /health    - Relay status (JSON)");
    info!("  /metrics   - Prometheus metrics");
    info!("  /escalated - Intents awaiting operator action");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(status)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayStatus;
    use crate::testing::sample_intent;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn state() -> AppState {
        AppState {
            status: Arc::new(RwLock::new(RelayStatus::new("1:0xcc", 1, 137))),
        }
    }

    #[tokio::test]
    async fn test_readiness_flips_after_first_round() {
        let state = state();
        let (code, _) = readiness(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        state.status.write().await.rounds_completed = 1;
        let (code, body) = readiness(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_health_reports_escalations() {
        let state = state();
        {
            let mut s = state.status.write().await;
            s.checkpoint = 41;
            s.escalated.push(EscalatedIntent {
                intent: sample_intent(7, 42, 0),
                reason: "paused".to_string(),
                escalated_at: Utc::now(),
            });
        }

        let Json(health) = health_check(State(state.clone())).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.checkpoint, 41);
        assert_eq!(health.escalated, 1);

        let Json(list) = escalated(State(state)).await;
        assert_eq!(list.len(), 1);
        let json = serde_json::to_value(&list[0]).unwrap();
        assert_eq!(json["reason"], "paused");
        assert_eq!(json["intent"]["position"]["block_number"], 42);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::UP.set(1.0);
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

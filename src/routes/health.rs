use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
        .route("/info", get(info))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthInfoResponse {
    service: &'static str,
    version: String,
    uptime: u64,
}

enum DbCheckStatus {
    Connected { latency_ms: u64 },
    Disconnected,
}

async fn database_check(state: &AppState) -> DbCheckStatus {
    let Some(proxy) = state.db_proxy() else {
        return DbCheckStatus::Disconnected;
    };

    let started = Instant::now();
    let probe = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        sqlx::query("SELECT 1").execute(proxy.pool()),
    )
    .await;

    match probe {
        Ok(Ok(_)) => DbCheckStatus::Connected {
            latency_ms: started.elapsed().as_millis() as u64,
        },
        _ => DbCheckStatus::Disconnected,
    }
}

async fn root(State(state): State<AppState>) -> Response {
    let db = database_check(&state).await;
    let ok = match db {
        DbCheckStatus::Connected { latency_ms } => {
            tracing::debug!(latency_ms, "database probe ok");
            true
        }
        DbCheckStatus::Disconnected => false,
    };

    let response = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        database: if ok { "connected" } else { "disconnected" },
        timestamp: now_iso(),
    };

    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    Json(HealthInfoResponse {
        service: "frases-backend",
        version: std::env::var("APP_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

use axum::{Json, extract::State};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceStatus,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub database: bool,
    pub llm: bool,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
}

/// Lightweight liveness probe for Docker healthchecks.
/// Returns 200 immediately with no database or provider calls.
/// Use `/health` for the full diagnostic check.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ok" })
}

/// Full health check. Queries the database and reports whether the
/// generation provider is configured.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Check database
    let db_healthy = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    // Provider key presence only; no billable call on a health probe.
    let llm_configured = state.llm.is_configured();

    let all_healthy = db_healthy && llm_configured;

    Json(HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceStatus {
            database: db_healthy,
            llm: llm_configured,
        },
    })
}

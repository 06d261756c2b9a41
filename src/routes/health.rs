use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pending_jobs: usize,
    pub backends: Vec<ComponentHealth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health — relay status with backend reachability.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut backends = Vec::new();
    for backend in state.engine.backends().unique() {
        let start = std::time::Instant::now();
        let check = if backend.is_available().await {
            ComponentHealth {
                name: backend.name().to_string(),
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        } else {
            ComponentHealth {
                name: backend.name().to_string(),
                status: "error".to_string(),
                latency_ms: None,
            }
        };
        backends.push(check);
    }

    let all_healthy = backends.iter().all(|b| b.status == "ok");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        pending_jobs: state.engine.pending_count(),
        backends,
    };

    (status_code, Json(response))
}

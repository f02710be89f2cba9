//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the session store and disk I/O

use crate::services::{artifact_store::probe_dir, upload_service::UploadService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;

/// `GET /healthz`
///
/// Very small liveness probe: always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Pings the session store.
/// 2. Performs a write/read/delete in the chunk directory.
/// 3. Asks the artifact store to do the same.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let sessions = match service.sessions.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let temp = match fs::create_dir_all(&service.temp_dir).await {
        Ok(()) => match probe_dir(&service.temp_dir).await {
            Ok(()) => CheckStatus::ok(),
            Err(e) => CheckStatus::failed(format!("chunk dir: {}", e)),
        },
        Err(e) => CheckStatus::failed(format!("could not create chunk dir: {}", e)),
    };

    let artifacts = match service.artifacts.probe().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("artifact store: {}", e)),
    };

    let overall_ok = sessions.ok && temp.ok && artifacts.ok;

    let mut checks = HashMap::new();
    checks.insert("sessions", sessions);
    checks.insert("chunk_dir", temp);
    checks.insert("artifacts", artifacts);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

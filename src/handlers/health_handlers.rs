//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, always "ok"
//! - GET /readyz   -> readiness: media table reachable, files directory writable

use crate::{imaging::CacheStats, services::storage_service::StorageService, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Cheap liveness probe, never performs I/O.
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
/// Runs each check and reports them by name. HTTP 200 when all pass,
/// HTTP 503 otherwise. The metadata cache counters are included for
/// visibility and never fail the probe.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("sqlite", check_database(&state.storage).await);
    checks.insert("disk", check_files_dir(&state.storage).await);

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks,
        cache: state.uploads.optimizer().cache().stats(),
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        tracing::warn!("readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_database(storage: &StorageService) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM media")
        .fetch_one(&*storage.db)
        .await
    {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

/// Write, read back and delete a probe file in the files directory.
async fn check_files_dir(storage: &StorageService) -> CheckStatus {
    if let Err(e) = storage.ensure_base_dir().await {
        return CheckStatus::failed(format!("could not create files dir: {}", e));
    }

    let tmp_path = storage.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, PROBE_BYTES).await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }
    let read_back = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;

    match (read_back, removed) {
        (Ok(bytes), _) if bytes != PROBE_BYTES => CheckStatus::failed("probe content mismatch"),
        (Ok(_), Ok(())) => CheckStatus::ok(),
        (Ok(_), Err(e)) => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {}", e)),
        },
        (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
    cache: CacheStats,
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

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

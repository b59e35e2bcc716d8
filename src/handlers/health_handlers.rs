//! Liveness and readiness probes.
//!
//! - GET /healthz  -> always "ok", no I/O
//! - GET /readyz   -> catalogs agree with the filesystem and the storage root
//!   is writable

use crate::services::storage_service::StorageService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_PAYLOAD: &[u8] = b"readyz";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn pass() -> Self {
        Self { ok: true, error: None }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The body lists each check
/// with the reason it failed.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("catalog", catalog_check(&service).await);
    checks.insert("disk", disk_check(service.base_path()).await);

    let ready = checks.values().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn catalog_check(service: &StorageService) -> CheckStatus {
    match service.check_consistency().await {
        Ok(report) if report.is_consistent() => CheckStatus::pass(),
        Ok(report) => CheckStatus::fail(
            report
                .issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Err(err) => CheckStatus::fail(err.to_string()),
    }
}

/// Write, read back and remove a dot-prefixed probe file under `root`.
async fn disk_check(root: &Path) -> CheckStatus {
    let probe = root.join(format!(".readyz_{}", Uuid::new_v4().simple()));
    if let Err(err) = fs::write(&probe, PROBE_PAYLOAD).await {
        return CheckStatus::fail(format!("write {}: {}", probe.display(), err));
    }

    let outcome = match fs::read(&probe).await {
        Ok(bytes) if bytes == PROBE_PAYLOAD => CheckStatus::pass(),
        Ok(_) => CheckStatus::fail("probe file read back different bytes"),
        Err(err) => CheckStatus::fail(format!("read {}: {}", probe.display(), err)),
    };
    if let Err(err) = fs::remove_file(&probe).await {
        tracing::warn!("could not remove readiness probe {}: {}", probe.display(), err);
    }
    outcome
}

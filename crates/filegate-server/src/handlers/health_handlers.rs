//! Health & readiness handlers.
//!
//! - GET /healthz -> liveness, always 200, never touches a backend.
//! - GET /readyz  -> probes every configured backend with a cheap existence
//!   check on its root and reports per-backend status.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use filegate_schema::ListObjectsRequest;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    backends: BTreeMap<String, CheckStatus>,
}

/// A count-only root listing is the cheapest operation every backend
/// implements, so it doubles as the readiness probe.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut backends = BTreeMap::new();
    let mut all_ok = true;

    for name in state.manager.backends() {
        let check = match state
            .manager
            .list_objects(
                name,
                ListObjectsRequest {
                    path: "/".into(),
                    recursive: false,
                    offset: 0,
                    limit: 0,
                },
            )
            .await
        {
            Ok(_) => CheckStatus { ok: true, error: None },
            Err(e) => {
                all_ok = false;
                CheckStatus { ok: false, error: Some(e.to_string()) }
            }
        };
        backends.insert(name.to_string(), check);
    }

    let status = if all_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadyResponse {
            status: if all_ok { "ok" } else { "error" },
            backends,
        }),
    )
}

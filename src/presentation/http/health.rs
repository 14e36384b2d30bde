use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::bootstrap::app_context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
}

/// Liveness: process is up and serving. No dependency checks.
pub async fn healthz() -> Json<HealthResp> {
    Json(HealthResp { status: "ok" })
}

/// Readiness: the shared Redis instance is reachable.
pub async fn readyz(State(ctx): State<AppContext>) -> Json<HealthResp> {
    let ok = ctx
        .room_stream
        .stream_len(&crate::domain::RoomKey::with_default_doc("__readyz__"))
        .await
        .is_ok();
    Json(HealthResp {
        status: if ok { "ok" } else { "degraded" },
    })
}

pub fn routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(ctx)
}

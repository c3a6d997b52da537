use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::Extension;
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::server::AppState;

static STARTED_AT: OnceLock<Instant> = OnceLock::new();

/// `GET /healthz` — ambient liveness probe. Not rate-limited or authenticated.
pub async fn healthz_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    tokio::fs::metadata(state.layout.stores_root()).await?;

    let started_at = *STARTED_AT.get_or_init(Instant::now);
    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": started_at.elapsed().as_secs(),
        "active_sessions": state.sessions.active_count(),
    })))
}

use std::sync::Arc;

use axum::{extract::State, Json};

use ar_integrations::cc_usage::CcUsage;

use super::state::ApiState;
use super::types::StatusResponse;

/// GET /api/status — daemon liveness, uptime, and active build count.
pub(crate) async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        active_builds: state.active_builds(),
        usage_limited_until: state.usage.limited_until(),
    })
}

/// GET /api/cc-usage — AI provider usage, `{available: false}` without a
/// provider.
pub(crate) async fn get_cc_usage(State(state): State<Arc<ApiState>>) -> Json<CcUsage> {
    Json(state.cc_usage().await)
}

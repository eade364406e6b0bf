//! Router assembly for the control API. Handlers are split by domain;
//! this module wires them together and owns the middleware stack.

mod activity;
mod issues;
mod misc;
mod projects;
pub mod state;
pub mod types;
mod websocket;

pub use state::ApiState;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

/// Build the full API router.
pub fn api_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(
            |origin: &axum::http::HeaderValue, _| {
                origin
                    .to_str()
                    .map(|o| {
                        o.starts_with("http://localhost")
                            || o.starts_with("http://127.0.0.1")
                            || o.starts_with("https://localhost")
                            || o.starts_with("https://127.0.0.1")
                    })
                    .unwrap_or(false)
            },
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(misc::get_status))
        .route("/api/projects", get(projects::list_projects))
        .route("/api/issues", get(issues::list_issues))
        .route("/api/issues/{id}", get(issues::get_issue_detail))
        .route("/api/issues/{id}", delete(issues::delete_issue))
        .route("/api/issues/{id}/pause", post(issues::pause_issue))
        .route("/api/issues/{id}/resume", post(issues::resume_issue))
        .route("/api/issues/{id}/retry", post(issues::retry_issue))
        .route("/api/issues/{id}/transition", post(issues::transition_issue))
        .route("/api/issues/{id}/transitions", get(issues::list_transitions))
        .route("/api/issues/{id}/reset", post(issues::reset_issue_fields))
        .route("/api/activity", get(activity::recent_activity))
        .route("/api/cc-usage", get(misc::get_cc_usage))
        .route("/api/ws", get(websocket::ws_handler))
        .layer(cors)
        .with_state(state)
}

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};

use ar_core::types::ActivityEntry;

use super::state::ApiState;
use super::types::ActivityQuery;
use crate::api_error::ApiError;

const RECENT_LIMIT_DEFAULT: u32 = 50;

/// GET /api/activity?limit= — cross-issue tail, newest first.
pub(crate) async fn recent_activity(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let entries = state
        .store
        .list_recent_activity(query.limit.unwrap_or(RECENT_LIMIT_DEFAULT))
        .await?;
    Ok(Json(entries))
}

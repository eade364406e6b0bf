use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use ar_core::store::IssueFilter;
use ar_core::types::{ActivityKind, Issue, IssueState};
use ar_engine::manual::{
    apply_field_resets, reachable_targets, resettable_nonzero, validate_manual,
};

use super::state::ApiState;
use super::types::{
    IssueDetailQuery, IssueDetailResponse, IssueListQuery, ResetRequest, TransitionRequest,
    TransitionsResponse,
};
use crate::api_error::ApiError;
use crate::protocol::HubFrame;

const TIMELINE_LIMIT_DEFAULT: u32 = 50;
const BUILD_LIMIT_DEFAULT: u32 = 200;

/// States an operator may pause from.
const PAUSABLE: [IssueState; 6] = [
    IssueState::Queued,
    IssueState::Refining,
    IssueState::Approved,
    IssueState::Building,
    IssueState::InReview,
    IssueState::AddressingFeedback,
];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_state(raw: &str) -> Result<IssueState, ApiError> {
    IssueState::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown state: {raw}")))
}

/// Persist a prepared issue, log the state change, broadcast, and wake the
/// loop — the side effects every mutating endpoint shares.
async fn commit_state_change(
    state: &ApiState,
    from: IssueState,
    updated: &Issue,
    detail: impl Into<String>,
) -> Result<Issue, ApiError> {
    let stored = state.store.update_issue(updated).await?;
    if let Err(e) = state
        .store
        .log_activity(
            stored.id,
            ActivityKind::StateChange,
            Some(from),
            Some(stored.state),
            detail.into(),
        )
        .await
    {
        warn!(issue_id = %stored.id, error = %e, "failed to log state change");
    }
    state
        .hub
        .broadcast(&HubFrame::issue_state_changed(&stored, from, stored.state));
    state.wake.notify();
    Ok(stored)
}

/// The state an issue held before it entered `via` (pause/failure),
/// according to the activity log. Falls back to `queued`.
async fn restored_state(state: &ApiState, issue: &Issue, via: IssueState) -> IssueState {
    match state.store.last_transition_into(issue.id, via).await {
        Ok(Some(entry)) => entry.from_state.unwrap_or(IssueState::Queued),
        Ok(None) => IssueState::Queued,
        Err(e) => {
            warn!(issue_id = %issue.id, error = %e, "restore lookup failed, using queued");
            IssueState::Queued
        }
    }
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

/// GET /api/issues?project_id=&state= — filtered issue list.
pub(crate) async fn list_issues(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<IssueListQuery>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let state_filter = query.state.as_deref().map(parse_state).transpose()?;
    let issues = state
        .store
        .list_issues(IssueFilter {
            project_id: query.project_id,
            state: state_filter,
        })
        .await?;
    Ok(Json(issues))
}

/// GET /api/issues/{id} — detail plus the two activity pages.
pub(crate) async fn get_issue_detail(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<IssueDetailQuery>,
) -> Result<Json<IssueDetailResponse>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    let timeline_activity = state
        .store
        .list_timeline_activity(
            id,
            query.timeline_limit.unwrap_or(TIMELINE_LIMIT_DEFAULT),
            query.timeline_offset.unwrap_or(0),
        )
        .await?;
    let build_activity = state
        .store
        .list_build_activity(
            id,
            query.build_limit.unwrap_or(BUILD_LIMIT_DEFAULT),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(IssueDetailResponse {
        issue,
        timeline_activity,
        build_activity,
    }))
}

/// GET /api/issues/{id}/transitions — manual targets currently reachable
/// plus the resettable fields holding non-zero values.
pub(crate) async fn list_transitions(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionsResponse>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    Ok(Json(TransitionsResponse {
        targets: reachable_targets(&issue)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect(),
        resettable_fields: resettable_nonzero(&issue),
    }))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// DELETE /api/issues/{id} — remove the issue; workspace cleanup is
/// best-effort.
pub(crate) async fn delete_issue(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let issue = state.store.get_issue(id).await?;

    if state.cancel_worker(id) {
        debug!(issue_id = %id, "cancelled running worker before deletion");
    }
    if issue.has_workspace() {
        match state.store.get_project(issue.project_id).await {
            Ok(project) => {
                state
                    .remove_workspace_best_effort(&project, &issue.workspace_name)
                    .await
            }
            Err(e) => warn!(issue_id = %id, error = %e, "project lookup failed during deletion"),
        }
    }

    state.store.delete_issue(id).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// POST /api/issues/{id}/pause
pub(crate) async fn pause_issue(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    if !PAUSABLE.contains(&issue.state) {
        return Err(ApiError::Conflict(format!(
            "cannot pause an issue in state {}",
            issue.state
        )));
    }

    let mut updated = issue.clone();
    updated.state = IssueState::Paused;
    let stored = commit_state_change(&state, issue.state, &updated, "paused by operator").await?;

    if state.cancel_worker(id) {
        debug!(issue_id = %id, "cancelled running worker on pause");
    }
    Ok(Json(stored))
}

/// POST /api/issues/{id}/resume — restore the pre-pause state.
pub(crate) async fn resume_issue(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    if issue.state != IssueState::Paused {
        return Err(ApiError::Conflict(format!(
            "cannot resume an issue in state {}",
            issue.state
        )));
    }

    let target = restored_state(&state, &issue, IssueState::Paused).await;
    let mut updated = issue.clone();
    updated.state = target;
    let stored = commit_state_change(&state, issue.state, &updated, "resumed by operator").await?;
    Ok(Json(stored))
}

/// POST /api/issues/{id}/retry — clear the failure and restore the
/// pre-failure state.
pub(crate) async fn retry_issue(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    if issue.state != IssueState::Failed {
        return Err(ApiError::Conflict(format!(
            "cannot retry an issue in state {}",
            issue.state
        )));
    }

    let target = restored_state(&state, &issue, IssueState::Failed).await;
    let mut updated = issue.clone();
    updated.error_message = None;
    updated.state = target;
    let stored = commit_state_change(&state, issue.state, &updated, "retried by operator").await?;
    Ok(Json(stored))
}

/// POST /api/issues/{id}/transition — validated manual transition with
/// optional atomic field resets.
pub(crate) async fn transition_issue(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id).await?;
    let target = parse_state(&request.target_state)?;
    validate_manual(&issue, target)?;

    let mut updated = issue.clone();
    let applied = apply_field_resets(&mut updated, &request.reset_fields);
    updated.state = target;

    let stored = commit_state_change(&state, issue.state, &updated, "manual transition").await?;
    if !applied.is_empty() {
        let entry = state
            .store
            .log_activity(
                id,
                ActivityKind::FieldReset,
                None,
                None,
                format!("reset {}", applied.join(", ")),
            )
            .await?;
        state.hub.broadcast(&HubFrame::activity(&entry));
    }
    Ok(Json(stored))
}

/// POST /api/issues/{id}/reset — clear fields without changing state.
pub(crate) async fn reset_issue_fields(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.store.get_issue(id).await?;

    let mut updated = issue.clone();
    let applied = apply_field_resets(&mut updated, &request.fields);
    if applied.is_empty() {
        return Err(ApiError::BadRequest(
            "no known resettable fields in request".into(),
        ));
    }

    let stored = state.store.update_issue(&updated).await?;
    let entry = state
        .store
        .log_activity(
            id,
            ActivityKind::FieldReset,
            None,
            None,
            format!("reset {}", applied.join(", ")),
        )
        .await?;
    state.hub.broadcast(&HubFrame::activity(&entry));
    state.wake.notify();
    Ok(Json(stored))
}

use std::sync::Arc;

use axum::{extract::State, Json};

use super::state::ApiState;
use super::types::ProjectSummary;
use crate::api_error::ApiError;

/// GET /api/projects — every project with its issue-state breakdown.
pub(crate) async fn list_projects(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let projects = state.store.list_projects().await?;
    let active = state.store.count_active_issues_by_project().await?;

    let mut summaries = Vec::with_capacity(projects.len());
    for project in projects {
        let counts = state
            .store
            .count_issues_by_state_for_project(project.id)
            .await?;
        summaries.push(ProjectSummary {
            active_issues: active.get(&project.id).copied().unwrap_or(0),
            issue_counts: counts
                .into_iter()
                .map(|(state, count)| (state.as_str().to_string(), count))
                .collect(),
            project,
        });
    }
    Ok(Json(summaries))
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ar_core::types::{ActivityEntry, Issue, Project};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct IssueListQuery {
    pub project_id: Option<Uuid>,
    pub state: Option<String>,
}

/// Paging for the two activity feeds on the detail endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct IssueDetailQuery {
    pub build_limit: Option<u32>,
    pub offset: Option<u32>,
    pub timeline_limit: Option<u32>,
    pub timeline_offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target_state: String,
    #[serde(default)]
    pub reset_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub fields: Vec<String>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub active_builds: usize,
    pub usage_limited_until: Option<chrono::DateTime<chrono::Utc>>,
}

/// A project plus its issue-state breakdown.
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub issue_counts: HashMap<String, u64>,
    pub active_issues: u64,
}

#[derive(Debug, Serialize)]
pub struct IssueDetailResponse {
    pub issue: Issue,
    pub timeline_activity: Vec<ActivityEntry>,
    pub build_activity: Vec<ActivityEntry>,
}

#[derive(Debug, Serialize)]
pub struct TransitionsResponse {
    pub targets: Vec<String>,
    pub resettable_fields: Vec<&'static str>,
}

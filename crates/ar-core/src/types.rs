use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IssueState
// ---------------------------------------------------------------------------

/// Closed set of lifecycle states an issue can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Queued,
    Refining,
    Approved,
    Building,
    WaitingApproval,
    InReview,
    AddressingFeedback,
    FixingChecks,
    Failed,
    Paused,
    Completed,
}

impl IssueState {
    /// Every state, in declaration order. Used by validation and the API.
    pub const ALL: [IssueState; 11] = [
        IssueState::Queued,
        IssueState::Refining,
        IssueState::Approved,
        IssueState::Building,
        IssueState::WaitingApproval,
        IssueState::InReview,
        IssueState::AddressingFeedback,
        IssueState::FixingChecks,
        IssueState::Failed,
        IssueState::Paused,
        IssueState::Completed,
    ];

    /// Terminal states are never re-evaluated by the orchestrator.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueState::Completed)
    }

    /// States that require a non-empty `workspace_name` (invariant I3).
    pub fn requires_workspace(&self) -> bool {
        matches!(
            self,
            IssueState::Building
                | IssueState::InReview
                | IssueState::AddressingFeedback
                | IssueState::FixingChecks
                | IssueState::Completed
        )
    }

    /// States that require an open pull request (invariant I4).
    pub fn requires_pr(&self) -> bool {
        matches!(
            self,
            IssueState::InReview | IssueState::AddressingFeedback | IssueState::FixingChecks
        )
    }

    /// Parse the snake_case tag used on the wire and in the database.
    pub fn parse(tag: &str) -> Option<IssueState> {
        IssueState::ALL.iter().copied().find(|s| s.as_str() == tag)
    }

    /// The snake_case tag for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueState::Queued => "queued",
            IssueState::Refining => "refining",
            IssueState::Approved => "approved",
            IssueState::Building => "building",
            IssueState::WaitingApproval => "waiting_approval",
            IssueState::InReview => "in_review",
            IssueState::AddressingFeedback => "addressing_feedback",
            IssueState::FixingChecks => "fixing_checks",
            IssueState::Failed => "failed",
            IssueState::Paused => "paused",
            IssueState::Completed => "completed",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Configuration of one repository under orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Absolute path of the local clone.
    pub local_path: String,
    pub tracker_team_id: String,
    pub tracker_assignee_id: String,
    pub host_owner: String,
    pub host_repo: String,
    pub default_branch: String,
    pub branch_prefix: String,
    pub max_build_iterations: u32,
    pub credential_profile: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, local_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            local_path: local_path.into(),
            tracker_team_id: String::new(),
            tracker_assignee_id: String::new(),
            host_owner: String::new(),
            host_repo: String::new(),
            default_branch: "main".to_string(),
            branch_prefix: "autoralph/".to_string(),
            max_build_iterations: 5,
            credential_profile: "default".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// IssueSignals
// ---------------------------------------------------------------------------

/// Observations the pollers have written onto the issue row.
///
/// Guards evaluate these against the issue's lifecycle fields
/// (`last_comment_id`, `last_review_id`, `last_check_sha`); actions consume a
/// signal by copying it into the lifecycle field and clearing the flag.
/// Persisted as a single JSON column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueSignals {
    /// Newest tracker comment observed (id + body).
    pub latest_comment_id: Option<String>,
    pub latest_comment_body: Option<String>,
    /// The newest comment matched the approval command.
    pub approval_comment: bool,
    /// Newest host review observed.
    pub review_id: Option<String>,
    /// That review asked for changes.
    pub changes_requested: bool,
    /// Combined checks for the current head are failing.
    pub checks_failing: bool,
    /// Head sha those checks belong to.
    pub check_sha: Option<String>,
    /// The PR base branch advanced underneath the branch.
    pub base_advanced: bool,
    /// The host reports the PR merged.
    pub merged: bool,
    /// A finished build loop awaits promotion by the next tick.
    pub build_done: bool,
    /// That build loop ran out of its iteration budget instead of finishing.
    pub build_exhausted: bool,
}

impl IssueSignals {
    /// The newest comment id, if it has not been consumed yet.
    pub fn pending_comment<'a>(&'a self, last_comment_id: Option<&str>) -> Option<&'a str> {
        match (&self.latest_comment_id, last_comment_id) {
            (Some(latest), Some(last)) if latest == last => None,
            (Some(latest), _) => Some(latest),
            (None, _) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// The central work item: one external tracker ticket being driven through
/// the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Opaque id of the ticket in the external tracker.
    pub external_id: String,
    /// Short human identifier, e.g. `RLP-42`.
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub state: IssueState,
    pub error_message: Option<String>,
    pub check_fix_attempts: u32,
    pub last_review_id: Option<String>,
    pub last_check_sha: Option<String>,
    pub last_comment_id: Option<String>,
    /// Non-empty once a working tree exists.
    pub workspace_name: String,
    pub branch_name: String,
    /// Greater than zero once a pull request is open.
    pub pr_number: u64,
    pub pr_url: Option<String>,
    /// Plan captured at approval time.
    pub plan_text: Option<String>,
    pub signals: IssueSignals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        project_id: Uuid,
        external_id: impl Into<String>,
        identifier: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            external_id: external_id.into(),
            identifier: identifier.into(),
            title: title.into(),
            description: String::new(),
            state: IssueState::Queued,
            error_message: None,
            check_fix_attempts: 0,
            last_review_id: None,
            last_check_sha: None,
            last_comment_id: None,
            workspace_name: String::new(),
            branch_name: String::new(),
            pr_number: 0,
            pr_url: None,
            plan_text: None,
            signals: IssueSignals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_workspace(&self) -> bool {
        !self.workspace_name.is_empty()
    }

    pub fn has_pr(&self) -> bool {
        self.pr_number > 0
    }
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    StateChange,
    BuildEvent,
    FieldReset,
    PrCreated,
    ChangesRequested,
    IssueCompleted,
    Ingested,
}

impl ActivityKind {
    /// The snake_case tag stored in the activity table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::StateChange => "state_change",
            ActivityKind::BuildEvent => "build_event",
            ActivityKind::FieldReset => "field_reset",
            ActivityKind::PrCreated => "pr_created",
            ActivityKind::ChangesRequested => "changes_requested",
            ActivityKind::IssueCompleted => "issue_completed",
            ActivityKind::Ingested => "ingested",
        }
    }

    /// Parse the stored tag back into a kind.
    pub fn parse(tag: &str) -> Option<ActivityKind> {
        const ALL: [ActivityKind; 7] = [
            ActivityKind::StateChange,
            ActivityKind::BuildEvent,
            ActivityKind::FieldReset,
            ActivityKind::PrCreated,
            ActivityKind::ChangesRequested,
            ActivityKind::IssueCompleted,
            ActivityKind::Ingested,
        ];
        ALL.iter().copied().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only per-issue history entry. Read newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub issue_id: Uuid,
    pub kind: ActivityKind,
    pub from_state: Option<IssueState>,
    pub to_state: Option<IssueState>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

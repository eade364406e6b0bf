//! Issue-tracker client interface and the poller that drives ingest and
//! comment detection.

mod linear;
mod poller;

pub use linear::LinearClient;
pub use poller::{TrackerPoller, TrackerPollSummary};

use async_trait::async_trait;

use crate::types::{TrackerComment, TrackerIssue};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker api error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// The capability surface the kernel needs from the issue tracker.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Issues assigned to the configured automation user in a team.
    async fn list_assigned_issues(
        &self,
        team_id: &str,
        assignee_id: &str,
    ) -> Result<Vec<TrackerIssue>>;

    /// All comments on an issue, oldest first.
    async fn list_comments(&self, issue_id: &str) -> Result<Vec<TrackerComment>>;

    async fn post_comment(&self, issue_id: &str, body: &str) -> Result<()>;

    /// Move the tracker ticket to the named workflow state (e.g. "Done").
    async fn set_issue_state(&self, issue_id: &str, state_name: &str) -> Result<()>;
}

/// A comment counts as an approval when its trimmed, lowercased body equals
/// or starts with one of the approval commands.
pub fn is_approval_command(body: &str) -> bool {
    let trimmed = body.trim().to_lowercase();
    trimmed == "approve"
        || trimmed == "lgtm"
        || trimmed.starts_with("approve ")
        || trimmed.starts_with("approve\n")
        || trimmed.starts_with("lgtm ")
        || trimmed.starts_with("lgtm\n")
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use ar_core::types::{ActivityEntry, Issue, IssueState};

/// Frame types pushed over the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    IssueStateChanged,
    BuildEvent,
    NewIssue,
    Activity,
}

/// One complete frame: `{ type, payload, timestamp }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HubFrame {
    fn new(kind: FrameKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn issue_state_changed(issue: &Issue, from: IssueState, to: IssueState) -> Self {
        Self::new(
            FrameKind::IssueStateChanged,
            json!({
                "issue": issue,
                "from": from,
                "to": to,
            }),
        )
    }

    pub fn build_event(issue: &Issue, detail: &str) -> Self {
        Self::new(
            FrameKind::BuildEvent,
            json!({
                "issue_id": issue.id,
                "identifier": issue.identifier,
                "detail": detail,
            }),
        )
    }

    pub fn new_issue(issue: &Issue) -> Self {
        Self::new(
            FrameKind::NewIssue,
            serde_json::to_value(issue).unwrap_or_default(),
        )
    }

    pub fn activity(entry: &ActivityEntry) -> Self {
        Self::new(
            FrameKind::Activity,
            serde_json::to_value(entry).unwrap_or_default(),
        )
    }
}

use ar_core::types::Issue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tracker wire types
// ---------------------------------------------------------------------------

/// An issue as the external tracker reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerIssue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    pub description: String,
}

/// A comment on a tracker issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerComment {
    pub id: String,
    pub body: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Host wire types
// ---------------------------------------------------------------------------

/// The newest review on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReview {
    pub id: String,
    pub changes_requested: bool,
}

/// A freshly opened pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPr {
    pub number: u64,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Narrow capability the pollers use to announce freshly ingested issues.
/// A `None` sink degrades to a no-op.
pub trait IngestSink: Send + Sync {
    fn issue_ingested(&self, issue: &Issue);
}

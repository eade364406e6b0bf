//! Adapter traits for the out-of-scope programs the engine drives: the
//! per-issue build loop and the AI agent invocations. The engine only
//! depends on the lifecycle contracts here; concrete adapters live in
//! [`crate::process`] and in tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ar_core::store::{Store, StoreError};
use ar_core::types::{ActivityEntry, ActivityKind, Issue, IssueState, Project};
use ar_integrations::host::HostError;
use ar_integrations::tracker::TrackerError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal result of a transition action or runner invocation.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The AI provider is rate-exhausted; engage the usage-limit gate
    /// instead of failing the issue.
    #[error("usage limit reached until {until}")]
    UsageLimited { until: DateTime<Utc> },
    /// The per-task cancellation token fired; partial progress stays as
    /// written, no failure bookkeeping.
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        ActionError::Failed(e.to_string())
    }
}

impl From<TrackerError> for ActionError {
    fn from(e: TrackerError) -> Self {
        ActionError::Failed(e.to_string())
    }
}

impl From<HostError> for ActionError {
    fn from(e: HostError) -> Self {
        ActionError::Failed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Event publishing
// ---------------------------------------------------------------------------

/// Broadcast-only sink for live events. The store stays the source of
/// truth; implementations fan the same facts out to subscribers. The
/// default methods make a `NoopPublisher` trivial.
pub trait EventPublisher: Send + Sync {
    fn issue_state_changed(&self, _issue: &Issue, _from: IssueState, _to: IssueState) {}
    fn build_event(&self, _issue: &Issue, _detail: &str) {}
    fn activity(&self, _entry: &ActivityEntry) {}
}

/// Publisher that drops everything (tests, headless runs).
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {}

/// Persists and broadcasts `build_event` activity emitted by a running
/// build loop.
pub struct BuildEvents {
    store: Arc<Store>,
    publisher: Arc<dyn EventPublisher>,
}

impl BuildEvents {
    pub fn new(store: Arc<Store>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Record one build event. Logging failures are non-fatal: the build
    /// outcome matters more than its trace.
    pub async fn emit(&self, issue: &Issue, detail: impl Into<String>) {
        let detail = detail.into();
        if let Err(e) = self
            .store
            .log_activity(issue.id, ActivityKind::BuildEvent, None, None, detail.clone())
            .await
        {
            warn!(issue = %issue.identifier, error = %e, "failed to log build event");
        }
        self.publisher.build_event(issue, &detail);
    }
}

// ---------------------------------------------------------------------------
// Build loop
// ---------------------------------------------------------------------------

/// How a build loop ended, short of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The loop finished its work; the branch is ready for review.
    Completed,
    /// The loop ran out of its iteration budget; an operator decides.
    ExhaustedIterations,
}

/// Lifecycle contract of the per-issue build loop.
///
/// The dispatcher owns the slot for the whole invocation; the runner must
/// observe `cancel` at its next suspension point and is free to leave
/// partial progress behind.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run_build(
        &self,
        project: &Project,
        issue: &Issue,
        events: &BuildEvents,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, ActionError>;
}

// ---------------------------------------------------------------------------
// Agent invocations
// ---------------------------------------------------------------------------

/// AI agent invocations behind the refinement and review-response actions.
/// Any of these may report `UsageLimited`.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Draft clarifying questions for a freshly ingested issue.
    async fn clarify(&self, project: &Project, issue: &Issue) -> Result<String, ActionError>;

    /// Draft a reply to an operator's iteration comment.
    async fn reply(
        &self,
        project: &Project,
        issue: &Issue,
        comment: &str,
    ) -> Result<String, ActionError>;

    /// Apply review feedback in the workspace, commit, and push.
    async fn apply_feedback(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError>;

    /// Fix failing checks in the workspace, commit, and push.
    async fn fix_checks(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError>;

    /// Rebase the branch onto its moved base and force-push.
    async fn rebase(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError>;
}

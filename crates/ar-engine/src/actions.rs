//! The side-effect actions attached to automatic transitions, plus the
//! construction of the standard transition registry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ar_core::store::{Store, StoreError};
use ar_core::types::{ActivityKind, Issue, IssueState};
use ar_integrations::host::HostClient;
use ar_integrations::tracker::TrackerClient;

use crate::runner::{
    ActionError, AgentRunner, BuildEvents, BuildOutcome, BuildRunner, EventPublisher,
};
use crate::state_machine::{StateMachine, Transition};
use crate::workspace::WorkspaceManager;

/// Upper bound on automatic check-fix rounds per head.
pub const MAX_CHECK_FIX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// ActionCtx
// ---------------------------------------------------------------------------

/// Capability set handed to every transition action.
pub struct ActionCtx {
    pub store: Arc<Store>,
    pub tracker: Arc<dyn TrackerClient>,
    pub host: Arc<dyn HostClient>,
    pub agent: Arc<dyn AgentRunner>,
    pub builder: Arc<dyn BuildRunner>,
    pub workspaces: Arc<WorkspaceManager>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// A transition's side effect. Mutations to `issue` are persisted by the
/// orchestrator's bookkeeping (or by the action itself on the
/// `self_persisting` build path). Actions must tolerate re-execution after
/// a retried tick.
#[async_trait]
pub trait TransitionAction: Send + Sync {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Re-read + re-apply + update until the optimistic write lands.
async fn persist_update(
    store: &Store,
    issue_id: uuid::Uuid,
    apply: impl Fn(&mut Issue) + Send + Sync,
) -> Result<Issue, ActionError> {
    for _ in 0..3 {
        let mut fresh = store.get_issue(issue_id).await?;
        apply(&mut fresh);
        match store.update_issue(&fresh).await {
            Ok(stored) => return Ok(stored),
            Err(StoreError::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ActionError::Failed(
        "issue update kept losing the optimistic race".into(),
    ))
}

/// Mark the pending tracker comment as processed.
fn consume_comment(issue: &mut Issue) {
    issue.last_comment_id = issue.signals.latest_comment_id.clone();
    issue.signals.latest_comment_body = None;
    issue.signals.approval_comment = false;
}

fn has_pending_comment(issue: &Issue) -> bool {
    issue
        .signals
        .pending_comment(issue.last_comment_id.as_deref())
        .is_some()
}

// ---------------------------------------------------------------------------
// Refinement actions
// ---------------------------------------------------------------------------

/// `queued → refining`: ask the agent for clarifying questions and post
/// them to the tracker.
pub struct ClarifyAction;

#[async_trait]
impl TransitionAction for ClarifyAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        let questions = ctx.agent.clarify(&project, issue).await?;
        ctx.tracker.post_comment(&issue.external_id, &questions).await?;
        Ok(())
    }
}

/// `refining → refining`: answer the operator's iteration comment.
pub struct ReplyAction;

#[async_trait]
impl TransitionAction for ReplyAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        let comment = issue.signals.latest_comment_body.clone().unwrap_or_default();
        let reply = ctx.agent.reply(&project, issue, &comment).await?;
        ctx.tracker.post_comment(&issue.external_id, &reply).await?;
        consume_comment(issue);
        Ok(())
    }
}

/// `refining → approved`: capture the plan and consume the approval comment.
pub struct CaptureApprovalAction;

#[async_trait]
impl TransitionAction for CaptureApprovalAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        _ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let approval_body = issue
            .signals
            .latest_comment_body
            .clone()
            .filter(|body| !body.trim().is_empty());
        issue.plan_text = Some(approval_body.unwrap_or_else(|| issue.description.clone()));
        consume_comment(issue);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Build actions
// ---------------------------------------------------------------------------

/// `approved → building` and `waiting_approval → building` (also startup
/// recovery): ensure the workspace, persist `building` at dispatch time
/// (I5), run the build loop in the held slot, then flag the outcome for the
/// next tick to promote.
///
/// This action manages issue state itself; it is registered with
/// [`Transition::self_persisting`].
pub struct BuildAction;

#[async_trait]
impl TransitionAction for BuildAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let from = issue.state;
        let project = ctx.store.get_project(issue.project_id).await?;

        if !issue.has_workspace() {
            let ws = ctx.workspaces.create(&project, issue).await?;
            issue.workspace_name = ws.name;
            issue.branch_name = ws.branch;
        }

        let workspace_name = issue.workspace_name.clone();
        let branch_name = issue.branch_name.clone();
        *issue = persist_update(&ctx.store, issue.id, move |fresh| {
            fresh.workspace_name = workspace_name.clone();
            fresh.branch_name = branch_name.clone();
            if fresh.signals.approval_comment {
                consume_comment(fresh);
            }
            fresh.signals.build_done = false;
            fresh.signals.build_exhausted = false;
            fresh.state = IssueState::Building;
        })
        .await?;

        if from != IssueState::Building {
            if let Err(e) = ctx
                .store
                .log_activity(
                    issue.id,
                    ActivityKind::StateChange,
                    Some(from),
                    Some(IssueState::Building),
                    "",
                )
                .await
            {
                warn!(issue = %issue.identifier, error = %e, "failed to log state change");
            }
            ctx.publisher
                .issue_state_changed(issue, from, IssueState::Building);
        }

        let events = BuildEvents::new(ctx.store.clone(), ctx.publisher.clone());
        let outcome = ctx.builder.run_build(&project, issue, &events, cancel).await?;

        let exhausted = outcome == BuildOutcome::ExhaustedIterations;
        *issue = persist_update(&ctx.store, issue.id, move |fresh| {
            // An operator may have paused or reset the issue mid-build; the
            // outcome only matters while it is still building.
            if fresh.state == IssueState::Building {
                fresh.signals.build_done = true;
                fresh.signals.build_exhausted = exhausted;
            }
        })
        .await?;
        Ok(())
    }
}

/// `building → in_review`: open the pull request (unless a rebuild already
/// has one) and clear the build flags.
pub struct OpenPrAction;

#[async_trait]
impl TransitionAction for OpenPrAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;

        if !issue.has_pr() {
            let title = format!("{}: {}", issue.identifier, issue.title);
            let body = issue
                .plan_text
                .clone()
                .unwrap_or_else(|| issue.description.clone());
            let pr = ctx
                .host
                .open_pull_request(
                    &project.host_owner,
                    &project.host_repo,
                    &title,
                    &body,
                    &issue.branch_name,
                    &project.default_branch,
                )
                .await?;
            issue.pr_number = pr.number;
            issue.pr_url = Some(pr.url);
            ctx.store
                .log_activity(
                    issue.id,
                    ActivityKind::PrCreated,
                    None,
                    None,
                    format!("opened pull request #{}", pr.number),
                )
                .await?;
        }

        issue.signals.build_done = false;
        issue.signals.build_exhausted = false;
        Ok(())
    }
}

/// `building → waiting_approval`: tell the operator the loop gave up.
pub struct NeedsOperatorAction;

#[async_trait]
impl TransitionAction for NeedsOperatorAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        let message = format!(
            "Build loop for {} stopped after {} iterations without finishing. \
             Reply `approve` to let it continue.",
            issue.identifier, project.max_build_iterations
        );
        ctx.tracker.post_comment(&issue.external_id, &message).await?;
        issue.signals.build_done = false;
        issue.signals.build_exhausted = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Review actions
// ---------------------------------------------------------------------------

/// `in_review → addressing_feedback`: record which review asked for changes.
pub struct NoteChangesRequestedAction;

#[async_trait]
impl TransitionAction for NoteChangesRequestedAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let review = issue.signals.review_id.clone().unwrap_or_default();
        ctx.store
            .log_activity(
                issue.id,
                ActivityKind::ChangesRequested,
                None,
                None,
                format!("review {review} requested changes"),
            )
            .await?;
        Ok(())
    }
}

/// `addressing_feedback → in_review`: have the agent address the review,
/// then mark that review as handled.
pub struct ApplyFeedbackAction;

#[async_trait]
impl TransitionAction for ApplyFeedbackAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        ctx.agent.apply_feedback(&project, issue, cancel).await?;
        issue.last_review_id = issue.signals.review_id.clone();
        issue.signals.changes_requested = false;
        Ok(())
    }
}

/// `fixing_checks → in_review`: have the agent fix the failing checks for
/// the observed head and count the attempt.
pub struct FixChecksAction;

#[async_trait]
impl TransitionAction for FixChecksAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        ctx.agent.fix_checks(&project, issue, cancel).await?;
        issue.last_check_sha = issue.signals.check_sha.clone();
        issue.check_fix_attempts += 1;
        issue.signals.checks_failing = false;
        Ok(())
    }
}

/// `in_review → in_review`: rebase onto the moved base branch.
pub struct RebaseAction;

#[async_trait]
impl TransitionAction for RebaseAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;
        ctx.agent.rebase(&project, issue, cancel).await?;
        issue.signals.base_advanced = false;
        Ok(())
    }
}

/// `in_review → completed`: tear down the workspace (best-effort), move the
/// tracker ticket to done, and record completion.
pub struct CompleteAction;

#[async_trait]
impl TransitionAction for CompleteAction {
    async fn execute(
        &self,
        issue: &mut Issue,
        ctx: &ActionCtx,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        let project = ctx.store.get_project(issue.project_id).await?;

        if let Err(e) = ctx.workspaces.remove(&project, &issue.workspace_name).await {
            warn!(
                issue = %issue.identifier,
                error = %e,
                "workspace removal failed, continuing with completion"
            );
        }
        ctx.tracker
            .set_issue_state(&issue.external_id, "Done")
            .await?;
        ctx.store
            .log_activity(
                issue.id,
                ActivityKind::IssueCompleted,
                None,
                None,
                format!("pull request #{} merged", issue.pr_number),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// The standard registry
// ---------------------------------------------------------------------------

/// Build the automatic transition table. Registration order within a `from`
/// state is the priority order.
pub fn standard_machine() -> StateMachine {
    use IssueState::*;

    let mut machine = StateMachine::new();

    machine.register(
        Transition::async_(Queued, Refining, "post clarifying questions")
            .with_action(Arc::new(ClarifyAction)),
    );
    machine.register(
        Transition::sync(Refining, Approved, "approval comment")
            .guarded(|i| i.signals.approval_comment && has_pending_comment(i))
            .with_action(Arc::new(CaptureApprovalAction)),
    );
    machine.register(
        Transition::async_(Refining, Refining, "iteration comment")
            .guarded(|i| !i.signals.approval_comment && has_pending_comment(i))
            .with_action(Arc::new(ReplyAction)),
    );
    machine.register(
        Transition::async_(Approved, Building, "run build loop")
            .self_persisting()
            .with_action(Arc::new(BuildAction)),
    );
    machine.register(
        Transition::sync(Building, InReview, "build completed")
            .guarded(|i| i.signals.build_done && !i.signals.build_exhausted)
            .with_action(Arc::new(OpenPrAction)),
    );
    machine.register(
        Transition::sync(Building, WaitingApproval, "iteration budget exhausted")
            .guarded(|i| i.signals.build_done && i.signals.build_exhausted)
            .with_action(Arc::new(NeedsOperatorAction)),
    );
    machine.register(
        Transition::async_(WaitingApproval, Building, "approved to continue building")
            .guarded(|i| i.signals.approval_comment && has_pending_comment(i))
            .self_persisting()
            .with_action(Arc::new(BuildAction)),
    );
    machine.register(
        Transition::sync(InReview, Completed, "pull request merged")
            .guarded(|i| i.signals.merged)
            .with_action(Arc::new(CompleteAction)),
    );
    machine.register(
        Transition::sync(InReview, AddressingFeedback, "changes requested")
            .guarded(|i| {
                i.signals.changes_requested
                    && i.signals.review_id.is_some()
                    && i.signals.review_id != i.last_review_id
            })
            .with_action(Arc::new(NoteChangesRequestedAction)),
    );
    machine.register(
        Transition::sync(InReview, FixingChecks, "checks failing").guarded(|i| {
            i.signals.checks_failing
                && i.signals.check_sha.is_some()
                && i.signals.check_sha != i.last_check_sha
                && i.check_fix_attempts < MAX_CHECK_FIX_ATTEMPTS
        }),
    );
    machine.register(
        Transition::async_(InReview, InReview, "rebase onto moved base")
            .guarded(|i| i.signals.base_advanced)
            .with_action(Arc::new(RebaseAction)),
    );
    machine.register(
        Transition::async_(AddressingFeedback, InReview, "apply review feedback")
            .with_action(Arc::new(ApplyFeedbackAction)),
    );
    machine.register(
        Transition::async_(FixingChecks, InReview, "fix failing checks")
            .with_action(Arc::new(FixChecksAction)),
    );

    machine
}

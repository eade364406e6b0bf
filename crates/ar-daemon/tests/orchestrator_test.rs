use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ar_core::store::Store;
use ar_core::types::{ActivityKind, Issue, IssueState, Project};
use ar_core::usage_limit::UsageLimiter;
use ar_core::wake::WakeSignal;
use ar_daemon::orchestrator::Orchestrator;
use ar_engine::actions::{standard_machine, ActionCtx};
use ar_engine::dispatcher::Dispatcher;
use ar_engine::runner::{
    ActionError, AgentRunner, BuildEvents, BuildOutcome, BuildRunner, NoopPublisher,
};
use ar_engine::workspace::WorkspaceManager;
use ar_integrations::host::{HostClient, Result as HostResult};
use ar_integrations::tracker::{Result as TrackerResult, TrackerClient};
use ar_integrations::types::{CreatedPr, HostReview, TrackerComment, TrackerIssue};

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockTracker {
    comments_posted: Mutex<Vec<(String, String)>>,
    states_set: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl TrackerClient for MockTracker {
    async fn list_assigned_issues(
        &self,
        _team_id: &str,
        _assignee_id: &str,
    ) -> TrackerResult<Vec<TrackerIssue>> {
        Ok(Vec::new())
    }

    async fn list_comments(&self, _issue_id: &str) -> TrackerResult<Vec<TrackerComment>> {
        Ok(Vec::new())
    }

    async fn post_comment(&self, issue_id: &str, body: &str) -> TrackerResult<()> {
        self.comments_posted
            .lock()
            .unwrap()
            .push((issue_id.to_string(), body.to_string()));
        Ok(())
    }

    async fn set_issue_state(&self, issue_id: &str, state_name: &str) -> TrackerResult<()> {
        self.states_set
            .lock()
            .unwrap()
            .push((issue_id.to_string(), state_name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MockHost {
    prs_opened: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl HostClient for MockHost {
    async fn open_pull_request(
        &self,
        _owner: &str,
        _repo: &str,
        title: &str,
        _body: &str,
        head: &str,
        _base: &str,
    ) -> HostResult<CreatedPr> {
        self.prs_opened
            .lock()
            .unwrap()
            .push((title.to_string(), head.to_string()));
        Ok(CreatedPr {
            number: 7,
            url: "https://example.test/pr/7".into(),
        })
    }

    async fn latest_review(
        &self,
        _owner: &str,
        _repo: &str,
        _pr_number: u64,
    ) -> HostResult<Option<HostReview>> {
        Ok(None)
    }

    async fn head_sha(&self, _owner: &str, _repo: &str, _pr_number: u64) -> HostResult<String> {
        Ok("sha-0".into())
    }

    async fn checks_failing(&self, _owner: &str, _repo: &str, _sha: &str) -> HostResult<bool> {
        Ok(false)
    }

    async fn pr_merged(&self, _owner: &str, _repo: &str, _pr_number: u64) -> HostResult<bool> {
        Ok(false)
    }

    async fn base_advanced(&self, _owner: &str, _repo: &str, _pr_number: u64) -> HostResult<bool> {
        Ok(false)
    }
}

#[derive(Default)]
struct MockAgent {
    ops: Mutex<Vec<&'static str>>,
    usage_limited: std::sync::atomic::AtomicBool,
}

impl MockAgent {
    fn check_limit(&self) -> Result<(), ActionError> {
        if self.usage_limited.load(Ordering::SeqCst) {
            return Err(ActionError::UsageLimited {
                until: Utc::now() + chrono::Duration::minutes(10),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRunner for MockAgent {
    async fn clarify(&self, _project: &Project, _issue: &Issue) -> Result<String, ActionError> {
        self.check_limit()?;
        self.ops.lock().unwrap().push("clarify");
        Ok("1. What scope exactly?".into())
    }

    async fn reply(
        &self,
        _project: &Project,
        _issue: &Issue,
        _comment: &str,
    ) -> Result<String, ActionError> {
        self.check_limit()?;
        self.ops.lock().unwrap().push("reply");
        Ok("Understood, narrowing the scope.".into())
    }

    async fn apply_feedback(
        &self,
        _project: &Project,
        _issue: &Issue,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.check_limit()?;
        self.ops.lock().unwrap().push("apply_feedback");
        Ok(())
    }

    async fn fix_checks(
        &self,
        _project: &Project,
        _issue: &Issue,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.check_limit()?;
        self.ops.lock().unwrap().push("fix_checks");
        Ok(())
    }

    async fn rebase(
        &self,
        _project: &Project,
        _issue: &Issue,
        _cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.check_limit()?;
        self.ops.lock().unwrap().push("rebase");
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum BuildMode {
    Complete,
    Exhausted,
    Fail,
    WaitForCancel,
}

struct MockBuilder {
    mode: Mutex<BuildMode>,
    calls: AtomicUsize,
}

impl MockBuilder {
    fn new(mode: BuildMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        }
    }

    fn set_mode(&self, mode: BuildMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl BuildRunner for MockBuilder {
    async fn run_build(
        &self,
        _project: &Project,
        issue: &Issue,
        events: &BuildEvents,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        events.emit(issue, "iteration 1").await;
        let mode = *self.mode.lock().unwrap();
        match mode {
            BuildMode::Complete => Ok(BuildOutcome::Completed),
            BuildMode::Exhausted => Ok(BuildOutcome::ExhaustedIterations),
            BuildMode::Fail => Err(ActionError::Failed("quality checks failed".into())),
            BuildMode::WaitForCancel => {
                cancel.cancelled().await;
                Err(ActionError::Cancelled)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    dispatcher: Dispatcher,
    wake: WakeSignal,
    usage: UsageLimiter,
    tracker: Arc<MockTracker>,
    host: Arc<MockHost>,
    agent: Arc<MockAgent>,
    builder: Arc<MockBuilder>,
    project: Project,
    _workspace_root: tempfile::TempDir,
}

async fn harness(build_mode: BuildMode) -> Harness {
    let store = Arc::new(Store::open_in_memory().await.expect("open store"));
    let mut project = Project::new("ralph", "/srv/ralph");
    project.host_owner = "acme".into();
    project.host_repo = "ralph".into();
    project.max_build_iterations = 5;
    store.create_project(&project).await.expect("project");

    let workspace_root = tempfile::tempdir().expect("tempdir");
    let workspaces = Arc::new(WorkspaceManager::new(workspace_root.path()));

    let tracker = Arc::new(MockTracker::default());
    let host = Arc::new(MockHost::default());
    let agent = Arc::new(MockAgent::default());
    let builder = Arc::new(MockBuilder::new(build_mode));

    let dispatcher = Dispatcher::new(3);
    let wake = WakeSignal::new();
    let usage = UsageLimiter::new();

    let ctx = Arc::new(ActionCtx {
        store: store.clone(),
        tracker: tracker.clone(),
        host: host.clone(),
        agent: agent.clone(),
        builder: builder.clone(),
        workspaces,
        publisher: Arc::new(NoopPublisher),
    });

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(standard_machine()),
        dispatcher.clone(),
        ctx,
        usage.clone(),
        wake.clone(),
        Arc::new(NoopPublisher),
        Duration::from_secs(60),
    );

    Harness {
        store,
        orchestrator,
        dispatcher,
        wake,
        usage,
        tracker,
        host,
        agent,
        builder,
        project,
        _workspace_root: workspace_root,
    }
}

impl Harness {
    async fn seed(&self, state: IssueState, with_workspace: bool) -> Issue {
        let mut issue = Issue::new(
            self.project.id,
            format!("ext-{}", Uuid::new_v4()),
            "RLP-1",
            "Add login",
        );
        issue.state = state;
        if with_workspace {
            issue.workspace_name = "ws-1".into();
            issue.branch_name = "autoralph/ws-1".into();
        }
        self.store.create_issue(&issue).await.expect("seed issue");
        self.store.get_issue(issue.id).await.expect("read back")
    }

    /// Tick, then let any dispatched work drain.
    async fn settle(&self) {
        self.orchestrator.tick().await;
        self.dispatcher.wait_idle().await;
    }

    async fn state_changes(&self, issue_id: Uuid) -> Vec<(Option<IssueState>, Option<IssueState>)> {
        self.store
            .list_activity(issue_id, 100, 0)
            .await
            .expect("activity")
            .into_iter()
            .filter(|e| e.kind == ActivityKind::StateChange)
            .map(|e| (e.from_state, e.to_state))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// S1 — ingest → refine → approve
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_issue_refines_then_approves() {
    let h = harness(BuildMode::Complete).await;
    let issue = h.seed(IssueState::Queued, false).await;

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Refining);
    assert!(h
        .state_changes(issue.id)
        .await
        .contains(&(Some(IssueState::Queued), Some(IssueState::Refining))));
    let comments = h.tracker.comments_posted.lock().unwrap().clone();
    assert_eq!(comments.len(), 1, "clarifying questions posted");

    // Operator approves.
    let mut approved = current.clone();
    approved.signals.latest_comment_id = Some("c-1".into());
    approved.signals.latest_comment_body = Some("approve — plan looks right".into());
    approved.signals.approval_comment = true;
    h.store.update_issue(&approved).await.expect("update");

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Approved);
    assert_eq!(current.last_comment_id.as_deref(), Some("c-1"));
    assert_eq!(
        current.plan_text.as_deref(),
        Some("approve — plan looks right")
    );
}

#[tokio::test]
async fn iteration_comment_gets_a_reply_and_stays_refining() {
    let h = harness(BuildMode::Complete).await;
    let seeded = h.seed(IssueState::Refining, false).await;

    let mut with_comment = seeded.clone();
    with_comment.signals.latest_comment_id = Some("c-2".into());
    with_comment.signals.latest_comment_body = Some("only admin accounts".into());
    h.store.update_issue(&with_comment).await.expect("update");

    h.settle().await;

    let current = h.store.get_issue(seeded.id).await.expect("get");
    assert_eq!(current.state, IssueState::Refining);
    assert_eq!(current.last_comment_id.as_deref(), Some("c-2"));
    assert_eq!(h.agent.ops.lock().unwrap().as_slice(), &["reply"]);
    assert_eq!(h.tracker.comments_posted.lock().unwrap().len(), 1);

    // Consumed comment does not trigger again.
    h.settle().await;
    assert_eq!(h.tracker.comments_posted.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// S2 / S3 — build success and failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn build_success_promotes_to_in_review_with_one_state_change() {
    let h = harness(BuildMode::Complete).await;
    let issue = h.seed(IssueState::Building, true).await;

    // First settle runs the persisted build; the follow-up wake promotes it.
    h.settle().await;
    assert!(h.wake.is_signalled(), "finished build wakes the loop");
    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::InReview);
    assert_eq!(current.pr_number, 7);
    assert_eq!(current.pr_url.as_deref(), Some("https://example.test/pr/7"));
    assert!(!current.signals.build_done);

    let changes = h.state_changes(issue.id).await;
    let promotions = changes
        .iter()
        .filter(|c| **c == (Some(IssueState::Building), Some(IssueState::InReview)))
        .count();
    assert_eq!(promotions, 1, "exactly one building→in_review state change");

    assert_eq!(h.host.prs_opened.lock().unwrap().len(), 1);
    let build_log = h
        .store
        .list_build_activity(issue.id, 10, 0)
        .await
        .expect("build activity");
    assert!(!build_log.is_empty(), "build events recorded");
}

#[tokio::test]
async fn build_failure_marks_failed_without_another_tick() {
    let h = harness(BuildMode::Fail).await;
    let issue = h.seed(IssueState::Building, true).await;

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Failed);
    assert!(current
        .error_message
        .as_deref()
        .unwrap()
        .contains("quality checks failed"));
    assert_eq!(h.dispatcher.active_count(), 0);
    assert!(h
        .state_changes(issue.id)
        .await
        .contains(&(Some(IssueState::Building), Some(IssueState::Failed))));
}

#[tokio::test]
async fn exhausted_build_waits_for_operator_approval() {
    let h = harness(BuildMode::Exhausted).await;
    let issue = h.seed(IssueState::Building, true).await;

    h.settle().await; // run the loop; it reports exhaustion
    h.settle().await; // promote to waiting_approval

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::WaitingApproval);
    let comments = h.tracker.comments_posted.lock().unwrap().clone();
    assert!(comments
        .iter()
        .any(|(_, body)| body.contains("stopped after 5 iterations")));

    // Operator approves more work; the next build completes.
    h.builder.set_mode(BuildMode::Complete);
    let mut approved = current.clone();
    approved.signals.latest_comment_id = Some("c-9".into());
    approved.signals.latest_comment_body = Some("approve".into());
    approved.signals.approval_comment = true;
    h.store.update_issue(&approved).await.expect("update");

    h.settle().await; // dispatch + run the resumed build
    h.settle().await; // promote

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::InReview);
    assert_eq!(h.builder.calls.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// S5 / P9 — recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_redispatches_each_persisted_build_once() {
    let h = harness(BuildMode::Complete).await;
    let a = h.seed(IssueState::Building, true).await;
    let b = h.seed(IssueState::Building, true).await;
    h.seed(IssueState::Queued, false).await;

    let recovered = h.orchestrator.recover_building().await;
    assert_eq!(recovered, 2);
    h.dispatcher.wait_idle().await;
    assert_eq!(h.builder.calls.load(Ordering::SeqCst), 2);

    for id in [a.id, b.id] {
        let current = h.store.get_issue(id).await.expect("get");
        assert!(current.signals.build_done);
        assert_eq!(current.state, IssueState::Building);
    }
}

// ---------------------------------------------------------------------------
// S6 — cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_build_releases_its_slot_without_failing_the_issue() {
    let h = harness(BuildMode::WaitForCancel).await;
    let issue = h.seed(IssueState::Building, true).await;

    h.orchestrator.tick().await;
    assert!(h.dispatcher.is_running(issue.id));

    // Wait for the build loop itself to be running, so the pause below
    // cannot race the action's initial state persistence.
    while h.builder.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // What POST /pause does after persisting `paused`.
    let mut paused = h.store.get_issue(issue.id).await.expect("get");
    paused.state = IssueState::Paused;
    h.store.update_issue(&paused).await.expect("update");
    assert!(h.dispatcher.cancel(issue.id));
    h.dispatcher.wait_idle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Paused, "no failure bookkeeping on cancel");
    assert!(current.error_message.is_none());
    assert!(!current.signals.build_done);
}

// ---------------------------------------------------------------------------
// S7 — usage-limit gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gate_skips_async_but_not_sync_transitions() {
    let h = harness(BuildMode::Complete).await;
    h.usage.set_limited_until(Utc::now() + chrono::Duration::minutes(10));

    // Async queued→refining is skipped.
    let queued = h.seed(IssueState::Queued, false).await;
    h.settle().await;
    assert_eq!(
        h.store.get_issue(queued.id).await.expect("get").state,
        IssueState::Queued
    );
    assert!(h.agent.ops.lock().unwrap().is_empty());

    // Gated `building` is not re-dispatched either.
    h.seed(IssueState::Building, true).await;
    h.settle().await;
    assert_eq!(h.builder.calls.load(Ordering::SeqCst), 0);

    // Sync refining→approved still executes.
    let refining = h.seed(IssueState::Refining, false).await;
    let mut approved = refining.clone();
    approved.signals.latest_comment_id = Some("c-1".into());
    approved.signals.latest_comment_body = Some("lgtm".into());
    approved.signals.approval_comment = true;
    h.store.update_issue(&approved).await.expect("update");
    h.settle().await;
    assert_eq!(
        h.store.get_issue(refining.id).await.expect("get").state,
        IssueState::Approved
    );

    // Once the deadline passes, async work resumes.
    h.usage.clear();
    h.settle().await;
    assert_eq!(
        h.store.get_issue(queued.id).await.expect("get").state,
        IssueState::Refining
    );
}

#[tokio::test]
async fn usage_limited_action_engages_the_gate_instead_of_failing() {
    let h = harness(BuildMode::Complete).await;
    h.agent.usage_limited.store(true, Ordering::SeqCst);
    let issue = h.seed(IssueState::Queued, false).await;

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Queued, "no failure, just gated");
    assert!(current.error_message.is_none());
    assert!(h.usage.is_limited());
}

// ---------------------------------------------------------------------------
// Review flows
// ---------------------------------------------------------------------------

async fn seed_in_review(h: &Harness) -> Issue {
    let seeded = h.seed(IssueState::InReview, true).await;
    let mut with_pr = seeded.clone();
    with_pr.pr_number = 7;
    h.store.update_issue(&with_pr).await.expect("update")
}

#[tokio::test]
async fn changes_requested_round_trips_through_addressing_feedback() {
    let h = harness(BuildMode::Complete).await;
    let issue = seed_in_review(&h).await;

    let mut observed = issue.clone();
    observed.signals.changes_requested = true;
    observed.signals.review_id = Some("r-2".into());
    h.store.update_issue(&observed).await.expect("update");

    h.settle().await; // sync: in_review → addressing_feedback
    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::AddressingFeedback);

    h.settle().await; // async: apply feedback, back to in_review
    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::InReview);
    assert_eq!(current.last_review_id.as_deref(), Some("r-2"));
    assert!(!current.signals.changes_requested);
    assert!(h.agent.ops.lock().unwrap().contains(&"apply_feedback"));

    // The handled review does not loop.
    h.settle().await;
    assert_eq!(
        h.store.get_issue(issue.id).await.expect("get").state,
        IssueState::InReview
    );
}

#[tokio::test]
async fn failing_checks_are_fixed_and_counted() {
    let h = harness(BuildMode::Complete).await;
    let issue = seed_in_review(&h).await;

    let mut observed = issue.clone();
    observed.signals.checks_failing = true;
    observed.signals.check_sha = Some("sha-9".into());
    h.store.update_issue(&observed).await.expect("update");

    h.settle().await; // in_review → fixing_checks
    h.settle().await; // fix, back to in_review

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::InReview);
    assert_eq!(current.check_fix_attempts, 1);
    assert_eq!(current.last_check_sha.as_deref(), Some("sha-9"));
}

#[tokio::test]
async fn merged_pr_completes_the_issue() {
    let h = harness(BuildMode::Complete).await;
    let issue = seed_in_review(&h).await;

    let mut observed = h.store.get_issue(issue.id).await.expect("get");
    observed.signals.merged = true;
    h.store.update_issue(&observed).await.expect("update");

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::Completed);
    assert!(!current.workspace_name.is_empty(), "workspace name survives completion");

    let states = h.tracker.states_set.lock().unwrap().clone();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].1, "Done");

    let activity = h.store.list_activity(issue.id, 20, 0).await.expect("activity");
    assert!(activity
        .iter()
        .any(|e| e.kind == ActivityKind::IssueCompleted));

    // Terminal: never re-evaluated.
    h.settle().await;
    assert_eq!(
        h.store.get_issue(issue.id).await.expect("get").state,
        IssueState::Completed
    );
}

#[tokio::test]
async fn rebase_holds_the_slot_and_returns_to_in_review() {
    let h = harness(BuildMode::Complete).await;
    let issue = seed_in_review(&h).await;

    let mut observed = h.store.get_issue(issue.id).await.expect("get");
    observed.signals.base_advanced = true;
    h.store.update_issue(&observed).await.expect("update");

    h.settle().await;

    let current = h.store.get_issue(issue.id).await.expect("get");
    assert_eq!(current.state, IssueState::InReview);
    assert!(!current.signals.base_advanced);
    assert!(h.agent.ops.lock().unwrap().contains(&"rebase"));
}

use uuid::Uuid;

use ar_core::types::{Issue, IssueState};
use ar_engine::actions::{standard_machine, MAX_CHECK_FIX_ATTEMPTS};
use ar_engine::state_machine::ExecClass;

fn issue_in(state: IssueState) -> Issue {
    let mut issue = Issue::new(Uuid::new_v4(), "ext-1", "RLP-1", "Add login");
    issue.state = state;
    issue
}

#[test]
fn queued_issues_move_to_refining_asynchronously() {
    let machine = standard_machine();
    let issue = issue_in(IssueState::Queued);

    let tr = machine.evaluate(&issue).expect("queued always refines");
    assert_eq!(tr.to, IssueState::Refining);
    assert_eq!(tr.class, ExecClass::Async);
}

#[test]
fn refining_distinguishes_iteration_from_approval() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::Refining);
    assert!(machine.evaluate(&issue).is_none(), "no comment, no move");

    issue.signals.latest_comment_id = Some("c-1".into());
    issue.signals.latest_comment_body = Some("narrow the scope".into());
    let tr = machine.evaluate(&issue).expect("iteration comment");
    assert_eq!(tr.to, IssueState::Refining);
    assert_eq!(tr.class, ExecClass::Async);

    issue.signals.approval_comment = true;
    let tr = machine.evaluate(&issue).expect("approval outranks iteration");
    assert_eq!(tr.to, IssueState::Approved);
    assert_eq!(tr.class, ExecClass::Sync);

    // A consumed comment drives nothing.
    issue.last_comment_id = Some("c-1".into());
    assert!(machine.evaluate(&issue).is_none());
}

#[test]
fn approved_issues_enter_the_build_path() {
    let machine = standard_machine();
    let issue = issue_in(IssueState::Approved);

    let tr = machine.evaluate(&issue).expect("approved builds");
    assert_eq!(tr.to, IssueState::Building);
    assert_eq!(tr.class, ExecClass::Async);
    assert!(!tr.applies_target_state, "the build action persists state itself");
}

#[test]
fn build_outcome_flags_promote_building() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::Building);
    assert!(machine.evaluate(&issue).is_none(), "still running");

    issue.signals.build_done = true;
    let tr = machine.evaluate(&issue).expect("completed build");
    assert_eq!(tr.to, IssueState::InReview);

    issue.signals.build_exhausted = true;
    let tr = machine.evaluate(&issue).expect("exhausted build");
    assert_eq!(tr.to, IssueState::WaitingApproval);
}

#[test]
fn waiting_approval_resumes_building_on_approval() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::WaitingApproval);
    assert!(machine.evaluate(&issue).is_none());

    issue.signals.latest_comment_id = Some("c-9".into());
    issue.signals.approval_comment = true;
    let tr = machine.evaluate(&issue).expect("approval resumes the build");
    assert_eq!(tr.to, IssueState::Building);
    assert!(!tr.applies_target_state);
}

#[test]
fn in_review_priorities_merge_feedback_checks_rebase() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::InReview);
    issue.workspace_name = "ws-1".into();
    issue.pr_number = 7;
    assert!(machine.evaluate(&issue).is_none());

    issue.signals.base_advanced = true;
    let tr = machine.evaluate(&issue).expect("rebase");
    assert_eq!((tr.from, tr.to), (IssueState::InReview, IssueState::InReview));
    assert_eq!(tr.class, ExecClass::Async);

    issue.signals.checks_failing = true;
    issue.signals.check_sha = Some("sha-1".into());
    let tr = machine.evaluate(&issue).expect("checks outrank rebase");
    assert_eq!(tr.to, IssueState::FixingChecks);

    issue.signals.changes_requested = true;
    issue.signals.review_id = Some("r-1".into());
    let tr = machine.evaluate(&issue).expect("feedback outranks checks");
    assert_eq!(tr.to, IssueState::AddressingFeedback);

    issue.signals.merged = true;
    let tr = machine.evaluate(&issue).expect("merge outranks everything");
    assert_eq!(tr.to, IssueState::Completed);
    assert_eq!(tr.class, ExecClass::Sync);
}

#[test]
fn handled_reviews_and_shas_do_not_retrigger() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::InReview);
    issue.pr_number = 7;
    issue.signals.changes_requested = true;
    issue.signals.review_id = Some("r-1".into());
    issue.last_review_id = Some("r-1".into());
    assert!(machine.evaluate(&issue).is_none(), "review already handled");

    let mut issue = issue_in(IssueState::InReview);
    issue.pr_number = 7;
    issue.signals.checks_failing = true;
    issue.signals.check_sha = Some("sha-1".into());
    issue.last_check_sha = Some("sha-1".into());
    assert!(machine.evaluate(&issue).is_none(), "head already fixed once");
}

#[test]
fn check_fix_attempts_are_bounded() {
    let machine = standard_machine();

    let mut issue = issue_in(IssueState::InReview);
    issue.pr_number = 7;
    issue.signals.checks_failing = true;
    issue.signals.check_sha = Some("sha-2".into());
    issue.check_fix_attempts = MAX_CHECK_FIX_ATTEMPTS;
    assert!(machine.evaluate(&issue).is_none(), "budget exhausted");

    issue.check_fix_attempts = MAX_CHECK_FIX_ATTEMPTS - 1;
    let tr = machine.evaluate(&issue).expect("one attempt left");
    assert_eq!(tr.to, IssueState::FixingChecks);
}

#[test]
fn feedback_and_check_fix_return_to_review() {
    let machine = standard_machine();

    let tr = machine
        .evaluate(&issue_in(IssueState::AddressingFeedback))
        .expect("feedback returns to review");
    assert_eq!(tr.to, IssueState::InReview);
    assert_eq!(tr.class, ExecClass::Async);

    let tr = machine
        .evaluate(&issue_in(IssueState::FixingChecks))
        .expect("check fix returns to review");
    assert_eq!(tr.to, IssueState::InReview);
    assert_eq!(tr.class, ExecClass::Async);
}

#[test]
fn terminal_and_operator_states_have_no_automatic_moves() {
    let machine = standard_machine();
    for state in [IssueState::Completed, IssueState::Failed, IssueState::Paused] {
        assert!(
            machine.evaluate(&issue_in(state)).is_none(),
            "{state} must not move automatically"
        );
    }
}

//! The operator-facing transition table. Distinct from the automatic table
//! on purpose: an operator action races the loop, and the only
//! synchronisation is the dispatcher's running check plus the store's
//! optimistic row update.

use ar_core::types::{Issue, IssueState};

/// Fields `POST /issues/{id}/reset` may clear.
pub const RESETTABLE_FIELDS: [&str; 4] = [
    "check_fix_attempts",
    "error_message",
    "last_review_id",
    "last_check_sha",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManualTransitionError {
    #[error("transition from {from} to {to} is not allowed")]
    Disallowed { from: IssueState, to: IssueState },
    #[error("transition to {to} requires a workspace")]
    NeedsWorkspace { to: IssueState },
    #[error("transition to {to} requires an open pull request")]
    NeedsPr { to: IssueState },
}

/// Target states an operator may request from `from`, before prerequisite
/// filtering. `completed` and `waiting_approval` are only ever reached
/// automatically and appear in no row.
pub fn manual_targets(from: IssueState) -> &'static [IssueState] {
    use IssueState::*;
    match from {
        Queued => &[Refining],
        Refining => &[Queued, Approved],
        Approved => &[Queued, Refining, Building],
        Paused | Failed => &[
            Queued,
            Refining,
            Approved,
            Building,
            InReview,
            AddressingFeedback,
            FixingChecks,
        ],
        InReview => &[AddressingFeedback, FixingChecks, Building, Refining, Queued],
        AddressingFeedback => &[InReview, Building],
        FixingChecks => &[InReview, Building],
        Building => &[Approved, Refining, Queued],
        WaitingApproval | Completed => &[],
    }
}

/// Validate an operator transition request against the table and the
/// workspace / pull-request prerequisites.
pub fn validate_manual(issue: &Issue, target: IssueState) -> Result<(), ManualTransitionError> {
    if !manual_targets(issue.state).contains(&target) {
        return Err(ManualTransitionError::Disallowed {
            from: issue.state,
            to: target,
        });
    }
    if target == IssueState::Building && !issue.has_workspace() {
        return Err(ManualTransitionError::NeedsWorkspace { to: target });
    }
    if target.requires_pr() && !issue.has_pr() {
        return Err(ManualTransitionError::NeedsPr { to: target });
    }
    Ok(())
}

/// Targets currently reachable for this issue (table ∩ prerequisites).
pub fn reachable_targets(issue: &Issue) -> Vec<IssueState> {
    manual_targets(issue.state)
        .iter()
        .copied()
        .filter(|target| validate_manual(issue, *target).is_ok())
        .collect()
}

/// The subset of resettable fields whose current values are non-zero.
pub fn resettable_nonzero(issue: &Issue) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if issue.check_fix_attempts > 0 {
        fields.push("check_fix_attempts");
    }
    if issue.error_message.is_some() {
        fields.push("error_message");
    }
    if issue.last_review_id.is_some() {
        fields.push("last_review_id");
    }
    if issue.last_check_sha.is_some() {
        fields.push("last_check_sha");
    }
    fields
}

/// Clear the named fields on the issue. Unknown names are ignored; the
/// names actually applied are returned (empty when nothing matched).
pub fn apply_field_resets(issue: &mut Issue, fields: &[String]) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for field in fields {
        match field.as_str() {
            "check_fix_attempts" => {
                issue.check_fix_attempts = 0;
                applied.push("check_fix_attempts");
            }
            "error_message" => {
                issue.error_message = None;
                applied.push("error_message");
            }
            "last_review_id" => {
                issue.last_review_id = None;
                applied.push("last_review_id");
            }
            "last_check_sha" => {
                issue.last_check_sha = None;
                applied.push("last_check_sha");
            }
            _ => {}
        }
    }
    applied
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::fmt;
use std::sync::Arc;

use ar_core::types::{Issue, IssueState};

use crate::actions::TransitionAction;

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Whether the orchestrator executes a transition inline or hands it to the
/// worker dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecClass {
    Sync,
    Async,
}

/// Pure predicate over an issue snapshot.
pub type Guard = Arc<dyn Fn(&Issue) -> bool + Send + Sync>;

/// One permitted automatic edge: `(from, to, guard, action)` plus the
/// routing metadata the orchestrator needs.
pub struct Transition {
    pub from: IssueState,
    pub to: IssueState,
    pub label: &'static str,
    pub class: ExecClass,
    /// When false the action persists its own state changes (the build path
    /// enters `building` at dispatch time, per I5) and the generic success
    /// bookkeeping leaves `state` alone.
    pub applies_target_state: bool,
    pub guard: Option<Guard>,
    pub action: Option<Arc<dyn TransitionAction>>,
}

impl Transition {
    pub fn sync(from: IssueState, to: IssueState, label: &'static str) -> Self {
        Self {
            from,
            to,
            label,
            class: ExecClass::Sync,
            applies_target_state: true,
            guard: None,
            action: None,
        }
    }

    pub fn async_(from: IssueState, to: IssueState, label: &'static str) -> Self {
        Self {
            class: ExecClass::Async,
            ..Self::sync(from, to, label)
        }
    }

    pub fn guarded(mut self, guard: impl Fn(&Issue) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn with_action(mut self, action: Arc<dyn TransitionAction>) -> Self {
        self.action = Some(action);
        self
    }

    /// Mark the action as managing issue state itself (build dispatch).
    pub fn self_persisting(mut self) -> Self {
        self.applies_target_state = false;
        self
    }

    fn matches(&self, issue: &Issue) -> bool {
        self.from == issue.state && self.guard.as_ref().map_or(true, |guard| guard(issue))
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("label", &self.label)
            .field("class", &self.class)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Registry of automatic transitions, evaluated in registration order.
/// Registered once at startup; evaluation is pure over an issue snapshot.
#[derive(Default)]
pub struct StateMachine {
    transitions: Vec<Transition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transition: Transition) {
        tracing::debug!(
            from = %transition.from,
            to = %transition.to,
            label = transition.label,
            "transition registered"
        );
        self.transitions.push(transition);
    }

    /// First registered transition whose `from` matches the issue's state
    /// and whose guard passes. Registration order is the priority order;
    /// duplicate `(from, to)` pairs are permitted and distinguished by guard.
    pub fn evaluate(&self, issue: &Issue) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.matches(issue))
    }

    /// Whether `(from, to)` is a registered automatic pair.
    pub fn allows(&self, from: IssueState, to: IssueState) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    pub fn transitions_from(&self, from: IssueState) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| t.from == from)
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

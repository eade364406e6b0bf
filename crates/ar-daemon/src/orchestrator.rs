use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ar_core::shutdown::ShutdownSignal;
use ar_core::store::{Store, StoreError};
use ar_core::types::{ActivityKind, Issue, IssueState};
use ar_core::usage_limit::UsageLimiter;
use ar_core::wake::WakeSignal;
use ar_engine::actions::{ActionCtx, BuildAction, TransitionAction};
use ar_engine::dispatcher::{DispatchError, Dispatcher};
use ar_engine::runner::{ActionError, EventPublisher};
use ar_engine::state_machine::{ExecClass, StateMachine, Transition};

/// The scheduling heart: one cooperative task that ticks on a timer, on
/// wake signals, and re-evaluates every open issue against the state
/// machine, routing transitions inline or through the dispatcher.
pub struct Orchestrator {
    store: Arc<Store>,
    machine: Arc<StateMachine>,
    dispatcher: Dispatcher,
    ctx: Arc<ActionCtx>,
    usage: UsageLimiter,
    wake: WakeSignal,
    publisher: Arc<dyn EventPublisher>,
    build_action: Arc<dyn TransitionAction>,
    tick_interval: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        machine: Arc<StateMachine>,
        dispatcher: Dispatcher,
        ctx: Arc<ActionCtx>,
        usage: UsageLimiter,
        wake: WakeSignal,
        publisher: Arc<dyn EventPublisher>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            machine,
            dispatcher,
            ctx,
            usage,
            wake,
            publisher,
            build_action: Arc::new(BuildAction),
            tick_interval,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Tick until shutdown. The fallback timer guarantees liveness; wakes
    /// from the API, the pollers, and finished workers pull ticks forward.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_rx = shutdown.subscribe();
        info!(
            tick_secs = self.tick_interval.as_secs(),
            max_workers = self.dispatcher.max_workers(),
            "orchestrator started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.wait() => {}
                _ = shutdown_rx.recv() => {
                    info!("orchestrator stopping");
                    return;
                }
            }
            self.tick().await;
        }
    }

    /// One pass over every open issue, in deterministic (id) order.
    pub async fn tick(&self) {
        let gated = self.usage.is_limited();
        let issues = match self.store.list_open_issues().await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "tick: listing issues failed, retrying next tick");
                return;
            }
        };

        for issue in issues {
            // Serialised per issue: a running worker owns this issue.
            if self.dispatcher.is_running(issue.id) {
                continue;
            }

            // I5: `building` without an outcome flag means the loop should
            // be running right now — restart reconciliation and manual
            // transitions into `building` both land here.
            if issue.state == IssueState::Building && !issue.signals.build_done {
                if !gated {
                    self.dispatch_build(issue);
                }
                continue;
            }

            let Some(transition) = self.machine.evaluate(&issue) else {
                continue;
            };
            match transition.class {
                ExecClass::Sync => self.execute_sync(transition, issue).await,
                ExecClass::Async => {
                    if gated {
                        debug!(issue = %issue.identifier, "usage-limited, skipping async transition");
                        continue;
                    }
                    self.dispatch_async(transition, issue);
                }
            }
        }
    }

    /// Re-dispatch every issue persisted as `building` (startup recovery).
    /// Returns the number of builds re-dispatched. Anything that does not
    /// fit the pool is picked up by the first tick.
    pub async fn recover_building(&self) -> usize {
        let issues = match self.store.list_issues_in_state(IssueState::Building).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "recovery: listing building issues failed");
                return 0;
            }
        };

        let mut recovered = 0;
        for issue in issues {
            if issue.signals.build_done {
                // Finished before the crash; the tick will promote it.
                continue;
            }
            let identifier = issue.identifier.clone();
            match self.dispatch_job(issue, self.build_action.clone(), IssueState::Building, false) {
                Ok(()) => {
                    info!(issue = %identifier, "re-dispatched persisted build");
                    recovered += 1;
                }
                Err(e) => {
                    warn!(issue = %identifier, error = %e, "recovery dispatch deferred to first tick");
                }
            }
        }
        recovered
    }

    // -----------------------------------------------------------------------
    // Sync path
    // -----------------------------------------------------------------------

    async fn execute_sync(&self, transition: &Transition, issue: Issue) {
        let from = issue.state;
        let mut work = issue;

        if let Some(action) = &transition.action {
            let cancel = CancellationToken::new();
            match action.execute(&mut work, &self.ctx, &cancel).await {
                Ok(()) => {}
                Err(ActionError::UsageLimited { until }) => {
                    self.usage.set_limited_until(until);
                    return;
                }
                Err(ActionError::Cancelled) => return,
                Err(ActionError::Failed(message)) => {
                    warn!(issue = %work.identifier, label = transition.label, error = %message, "sync action failed");
                    mark_failed(&self.store, self.publisher.as_ref(), work.id, &message).await;
                    return;
                }
            }
        }

        work.state = transition.to;
        match self.store.update_issue(&work).await {
            Ok(stored) => {
                self.log_state_change(&stored, from, transition.to, "").await;
                self.publisher
                    .issue_state_changed(&stored, from, transition.to);
                // Follow-up transitions may be enabled immediately.
                self.wake.notify();
            }
            Err(StoreError::Conflict) => {
                warn!(issue = %work.identifier, label = transition.label, "sync transition lost the update race");
            }
            Err(e) => {
                warn!(issue = %work.identifier, error = %e, "sync transition store write failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Async path
    // -----------------------------------------------------------------------

    fn dispatch_async(&self, transition: &Transition, issue: Issue) {
        let Some(action) = transition.action.clone() else {
            warn!(label = transition.label, "async transition without an action");
            return;
        };
        let label = transition.label;
        let identifier = issue.identifier.clone();
        match self.dispatch_job(
            issue,
            action,
            transition.to,
            transition.applies_target_state,
        ) {
            Ok(()) => debug!(issue = %identifier, label, "dispatched async transition"),
            Err(DispatchError::NoSlotAvailable) => {
                debug!(issue = %identifier, label, "worker pool saturated, retrying next tick");
            }
            Err(DispatchError::AlreadyRunning) => {}
        }
    }

    fn dispatch_build(&self, issue: Issue) {
        let identifier = issue.identifier.clone();
        match self.dispatch_job(issue, self.build_action.clone(), IssueState::Building, false) {
            Ok(()) => debug!(issue = %identifier, "dispatched build loop"),
            Err(DispatchError::NoSlotAvailable) => {
                debug!(issue = %identifier, "worker pool saturated, build retried next tick");
            }
            Err(DispatchError::AlreadyRunning) => {}
        }
    }

    /// Wrap an action with the terminal bookkeeping and hand it to the
    /// dispatcher, which owns the slot for the whole wrapped body.
    fn dispatch_job(
        &self,
        issue: Issue,
        action: Arc<dyn TransitionAction>,
        to: IssueState,
        applies_target_state: bool,
    ) -> Result<(), DispatchError> {
        let ctx = self.ctx.clone();
        let store = self.store.clone();
        let publisher = self.publisher.clone();
        let usage = self.usage.clone();
        let wake = self.wake.clone();
        let from = issue.state;
        let issue_id = issue.id;
        let identifier = issue.identifier.clone();

        let run = move |cancel: CancellationToken| -> BoxFuture<'static, Result<Issue, ActionError>> {
            Box::pin(async move {
                let mut work = issue;
                action.execute(&mut work, &ctx, &cancel).await?;
                Ok(work)
            })
        };

        let finish = move |result: Result<Issue, ActionError>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                match result {
                    Ok(work) => {
                        if applies_target_state {
                            let mut updated = work;
                            updated.state = to;
                            match store.update_issue(&updated).await {
                                Ok(stored) => {
                                    if let Err(e) = store
                                        .log_activity(
                                            stored.id,
                                            ActivityKind::StateChange,
                                            Some(from),
                                            Some(to),
                                            "",
                                        )
                                        .await
                                    {
                                        warn!(issue = %stored.identifier, error = %e, "failed to log state change");
                                    }
                                    publisher.issue_state_changed(&stored, from, to);
                                }
                                Err(StoreError::Conflict) => {
                                    warn!(issue = %identifier, "async result lost the update race, re-evaluating next tick");
                                }
                                Err(e) => {
                                    warn!(issue = %identifier, error = %e, "async bookkeeping store write failed");
                                }
                            }
                        }
                        wake.notify();
                    }
                    Err(ActionError::UsageLimited { until }) => {
                        usage.set_limited_until(until);
                    }
                    Err(ActionError::Cancelled) => {
                        debug!(issue = %identifier, "async action cancelled");
                    }
                    Err(ActionError::Failed(message)) => {
                        warn!(issue = %identifier, error = %message, "async action failed");
                        mark_failed(&store, publisher.as_ref(), issue_id, &message).await;
                        wake.notify();
                    }
                }
            })
        };

        self.dispatcher.dispatch(issue_id, run, finish)
    }

    async fn log_state_change(&self, issue: &Issue, from: IssueState, to: IssueState, detail: &str) {
        if let Err(e) = self
            .store
            .log_activity(issue.id, ActivityKind::StateChange, Some(from), Some(to), detail)
            .await
        {
            warn!(issue = %issue.identifier, error = %e, "failed to log state change");
        }
    }
}

/// Failure bookkeeping shared by both execution paths: persist `failed` +
/// `error_message`, log, broadcast. Never propagates.
pub(crate) async fn mark_failed(
    store: &Store,
    publisher: &dyn EventPublisher,
    issue_id: Uuid,
    message: &str,
) {
    for _ in 0..3 {
        let issue = match store.get_issue(issue_id).await {
            Ok(issue) => issue,
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failure bookkeeping: issue fetch failed");
                return;
            }
        };
        let from = issue.state;
        let mut failed = issue;
        failed.state = IssueState::Failed;
        failed.error_message = Some(message.to_string());

        match store.update_issue(&failed).await {
            Ok(stored) => {
                if let Err(e) = store
                    .log_activity(
                        stored.id,
                        ActivityKind::StateChange,
                        Some(from),
                        Some(IssueState::Failed),
                        message,
                    )
                    .await
                {
                    warn!(issue = %stored.identifier, error = %e, "failed to log failure");
                }
                publisher.issue_state_changed(&stored, from, IssueState::Failed);
                return;
            }
            Err(StoreError::Conflict) => continue,
            Err(e) => {
                warn!(issue_id = %issue_id, error = %e, "failure bookkeeping store write failed");
                return;
            }
        }
    }
    warn!(issue_id = %issue_id, "failure bookkeeping kept losing the update race");
}

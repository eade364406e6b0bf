use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ar_core::shutdown::ShutdownSignal;
use ar_core::store::{Store, StoreError};
use ar_core::types::{Issue, Project};
use ar_core::wake::WakeSignal;

use super::{HostClient, HostError};

#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Watches open pull requests and records reviews, check results, merges,
/// and base movement as issue signals.
pub struct HostPoller {
    store: Arc<Store>,
    client: Arc<dyn HostClient>,
    wake: WakeSignal,
    interval: Duration,
}

impl HostPoller {
    pub fn new(
        store: Arc<Store>,
        client: Arc<dyn HostClient>,
        wake: WakeSignal,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            client,
            wake,
            interval,
        }
    }

    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut shutdown_rx = shutdown.subscribe();
        info!(interval_secs = self.interval.as_secs(), "host poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let updates = self.poll_once().await;
                    if updates > 0 {
                        debug!(updates, "host poll cycle");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("host poller stopping");
                    break;
                }
            }
        }
    }

    /// One cycle over every issue with an open PR. Returns the number of
    /// issues whose signals changed.
    pub async fn poll_once(&self) -> u32 {
        let issues = match self.store.list_open_issues().await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "host poll: listing issues failed");
                return 0;
            }
        };

        let mut updates = 0;
        for issue in issues {
            if !issue.state.requires_pr() || !issue.has_pr() {
                continue;
            }
            let project = match self.store.get_project(issue.project_id).await {
                Ok(project) => project,
                Err(e) => {
                    warn!(issue = %issue.identifier, error = %e, "host poll: project lookup failed");
                    continue;
                }
            };
            match self.observe_pr(&project, &issue).await {
                Ok(true) => {
                    updates += 1;
                    self.wake.notify();
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(issue = %issue.identifier, error = %e, "host poll failed for issue");
                }
            }
        }
        updates
    }

    /// Refresh one issue's host signals. Returns whether anything changed.
    async fn observe_pr(&self, project: &Project, issue: &Issue) -> Result<bool, PollError> {
        let owner = &project.host_owner;
        let repo = &project.host_repo;

        let mut updated = issue.clone();

        if self.client.pr_merged(owner, repo, issue.pr_number).await? {
            updated.signals.merged = true;
        } else {
            if let Some(review) = self
                .client
                .latest_review(owner, repo, issue.pr_number)
                .await?
            {
                updated.signals.review_id = Some(review.id);
                updated.signals.changes_requested = review.changes_requested;
            }

            let head = self.client.head_sha(owner, repo, issue.pr_number).await?;
            updated.signals.checks_failing =
                self.client.checks_failing(owner, repo, &head).await?;
            updated.signals.check_sha = Some(head);

            updated.signals.base_advanced = self
                .client
                .base_advanced(owner, repo, issue.pr_number)
                .await?;
        }

        if updated.signals == issue.signals {
            return Ok(false);
        }

        match self.store.update_issue(&updated).await {
            Ok(_) => Ok(true),
            // The row moved underneath us; re-observed next cycle.
            Err(StoreError::Conflict) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

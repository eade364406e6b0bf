use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ar_core::shutdown::ShutdownSignal;
use ar_core::store::{IssueFilter, Store, StoreError};
use ar_core::types::{ActivityKind, Issue, IssueState, Project};
use ar_core::wake::WakeSignal;

use super::{is_approval_command, TrackerClient, TrackerError};
use crate::types::IngestSink;

#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one poll cycle accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackerPollSummary {
    pub ingested: u32,
    pub comment_updates: u32,
}

/// Periodically ingests newly assigned tracker issues and surfaces fresh
/// comments as issue signals. Failures are logged and retried on the next
/// cycle; the poller never takes the process down.
pub struct TrackerPoller {
    store: Arc<Store>,
    client: Arc<dyn TrackerClient>,
    sink: Option<Arc<dyn IngestSink>>,
    wake: WakeSignal,
    interval: Duration,
}

impl TrackerPoller {
    pub fn new(
        store: Arc<Store>,
        client: Arc<dyn TrackerClient>,
        sink: Option<Arc<dyn IngestSink>>,
        wake: WakeSignal,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            client,
            sink,
            wake,
            interval,
        }
    }

    /// Poll until shutdown. The first cycle runs immediately so a fresh
    /// daemon ingests without waiting a full interval.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut shutdown_rx = shutdown.subscribe();
        info!(interval_secs = self.interval.as_secs(), "tracker poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.poll_once().await;
                    if summary.ingested > 0 || summary.comment_updates > 0 {
                        debug!(
                            ingested = summary.ingested,
                            comment_updates = summary.comment_updates,
                            "tracker poll cycle"
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("tracker poller stopping");
                    break;
                }
            }
        }
    }

    /// One full cycle over every project.
    pub async fn poll_once(&self) -> TrackerPollSummary {
        let mut summary = TrackerPollSummary::default();

        let projects = match self.store.list_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(error = %e, "tracker poll: listing projects failed");
                return summary;
            }
        };

        for project in &projects {
            match self.ingest_project(project).await {
                Ok(n) => summary.ingested += n,
                Err(e) => warn!(project = %project.name, error = %e, "issue ingest failed"),
            }
            match self.scan_comments(project).await {
                Ok(n) => summary.comment_updates += n,
                Err(e) => warn!(project = %project.name, error = %e, "comment scan failed"),
            }
        }
        summary
    }

    /// Create `queued` issues for tracker tickets we have not seen before.
    async fn ingest_project(&self, project: &Project) -> Result<u32, PollError> {
        let remote = self
            .client
            .list_assigned_issues(&project.tracker_team_id, &project.tracker_assignee_id)
            .await?;

        let known = self
            .store
            .list_issues(IssueFilter {
                project_id: Some(project.id),
                state: None,
            })
            .await?;
        let known_ids: std::collections::HashSet<&str> =
            known.iter().map(|i| i.external_id.as_str()).collect();

        let mut ingested = 0;
        for ticket in remote {
            if known_ids.contains(ticket.id.as_str()) {
                continue;
            }
            let mut issue = Issue::new(project.id, &ticket.id, &ticket.identifier, &ticket.title);
            issue.description = ticket.description;

            match self.store.create_issue(&issue).await {
                Ok(()) => {}
                // Raced another cycle; the issue exists now either way.
                Err(StoreError::AlreadyExists) => continue,
                Err(e) => return Err(e.into()),
            }
            self.store
                .log_activity(
                    issue.id,
                    ActivityKind::Ingested,
                    None,
                    None,
                    format!("ingested {} from tracker", issue.identifier),
                )
                .await?;
            if let Some(sink) = &self.sink {
                sink.issue_ingested(&issue);
            }
            info!(issue = %issue.identifier, project = %project.name, "issue ingested");
            ingested += 1;
            self.wake.notify();
        }
        Ok(ingested)
    }

    /// Surface the newest operator comment on refinement-phase issues.
    async fn scan_comments(&self, project: &Project) -> Result<u32, PollError> {
        let issues = self
            .store
            .list_issues(IssueFilter {
                project_id: Some(project.id),
                state: None,
            })
            .await?;

        let mut updates = 0;
        for issue in issues {
            if !matches!(
                issue.state,
                IssueState::Refining | IssueState::WaitingApproval
            ) {
                continue;
            }

            let comments = self.client.list_comments(&issue.external_id).await?;
            // The automation user's own replies never drive transitions.
            let newest = comments
                .iter()
                .rev()
                .find(|c| c.author_id != project.tracker_assignee_id);
            let Some(comment) = newest else { continue };

            let already_seen = issue.signals.latest_comment_id.as_deref() == Some(&comment.id)
                || issue.last_comment_id.as_deref() == Some(&comment.id);
            if already_seen {
                continue;
            }

            let mut updated = issue.clone();
            updated.signals.latest_comment_id = Some(comment.id.clone());
            updated.signals.latest_comment_body = Some(comment.body.clone());
            updated.signals.approval_comment = is_approval_command(&comment.body);

            match self.store.update_issue(&updated).await {
                Ok(_) => {
                    updates += 1;
                    self.wake.notify();
                }
                // Someone else touched the row; next cycle re-reads it.
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(updates)
    }
}

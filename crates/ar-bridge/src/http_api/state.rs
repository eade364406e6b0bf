use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use ar_core::store::Store;
use ar_core::types::Project;
use ar_core::usage_limit::UsageLimiter;
use ar_core::wake::WakeSignal;
use ar_engine::dispatcher::Dispatcher;
use ar_engine::workspace::WorkspaceManager;
use ar_integrations::cc_usage::CcUsageProvider;

use crate::event_bus::Hub;

// ---------------------------------------------------------------------------
// Optional collaborators
// ---------------------------------------------------------------------------

/// Lets the API observe and cancel running build workers. `None` degrades
/// to "nothing running, nothing to cancel".
pub trait BuildChecker: Send + Sync {
    fn is_running(&self, issue_id: Uuid) -> bool;
    fn cancel(&self, issue_id: Uuid) -> bool;
    fn active_count(&self) -> usize;
}

impl BuildChecker for Dispatcher {
    fn is_running(&self, issue_id: Uuid) -> bool {
        Dispatcher::is_running(self, issue_id)
    }

    fn cancel(&self, issue_id: Uuid) -> bool {
        Dispatcher::cancel(self, issue_id)
    }

    fn active_count(&self) -> usize {
        Dispatcher::active_count(self)
    }
}

/// Best-effort workspace cleanup on issue deletion. `None` is a no-op.
#[async_trait]
pub trait WorkspaceRemover: Send + Sync {
    async fn remove_workspace(&self, project: &Project, name: &str) -> Result<(), String>;
}

#[async_trait]
impl WorkspaceRemover for WorkspaceManager {
    async fn remove_workspace(&self, project: &Project, name: &str) -> Result<(), String> {
        self.remove(project, name).await.map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ApiState
// ---------------------------------------------------------------------------

/// Shared state for every HTTP/WS handler.
pub struct ApiState {
    pub store: Arc<Store>,
    pub hub: Hub,
    pub wake: WakeSignal,
    pub usage: UsageLimiter,
    pub started_at: DateTime<Utc>,
    checker: Option<Arc<dyn BuildChecker>>,
    workspace_remover: Option<Arc<dyn WorkspaceRemover>>,
    cc_usage: Option<Arc<dyn CcUsageProvider>>,
}

impl ApiState {
    pub fn new(store: Arc<Store>, hub: Hub, wake: WakeSignal, usage: UsageLimiter) -> Self {
        Self {
            store,
            hub,
            wake,
            usage,
            started_at: Utc::now(),
            checker: None,
            workspace_remover: None,
            cc_usage: None,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn BuildChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn with_workspace_remover(mut self, remover: Arc<dyn WorkspaceRemover>) -> Self {
        self.workspace_remover = Some(remover);
        self
    }

    pub fn with_cc_usage(mut self, provider: Arc<dyn CcUsageProvider>) -> Self {
        self.cc_usage = Some(provider);
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    pub(crate) fn is_running(&self, issue_id: Uuid) -> bool {
        self.checker.as_ref().is_some_and(|c| c.is_running(issue_id))
    }

    pub(crate) fn cancel_worker(&self, issue_id: Uuid) -> bool {
        self.checker.as_ref().is_some_and(|c| c.cancel(issue_id))
    }

    pub(crate) fn active_builds(&self) -> usize {
        self.checker.as_ref().map_or(0, |c| c.active_count())
    }

    pub(crate) async fn remove_workspace_best_effort(&self, project: &Project, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Some(remover) = &self.workspace_remover {
            if let Err(e) = remover.remove_workspace(project, name).await {
                warn!(workspace = name, error = %e, "workspace cleanup failed");
            }
        }
    }

    pub(crate) async fn cc_usage(&self) -> ar_integrations::cc_usage::CcUsage {
        match &self.cc_usage {
            Some(provider) => provider.usage().await,
            None => ar_integrations::cc_usage::CcUsage::unavailable(),
        }
    }
}

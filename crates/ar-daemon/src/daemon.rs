use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use ar_bridge::event_bus::{Hub, HubPublisher};
use ar_bridge::http_api::{api_router, ApiState};
use ar_core::config::{expand_home, Config, ProjectConfig};
use ar_core::shutdown::ShutdownSignal;
use ar_core::store::Store;
use ar_core::types::Project;
use ar_core::usage_limit::UsageLimiter;
use ar_core::wake::WakeSignal;
use ar_engine::actions::{standard_machine, ActionCtx};
use ar_engine::dispatcher::Dispatcher;
use ar_engine::process::CommandRunner;
use ar_engine::workspace::WorkspaceManager;
use ar_integrations::cc_usage::CommandCcUsage;
use ar_integrations::host::{GitHubClient, HostClient, HostPoller};
use ar_integrations::tracker::{LinearClient, TrackerClient, TrackerPoller};
use ar_integrations::types::IngestSink;

use crate::orchestrator::Orchestrator;

/// The assembled autoralph process: store, engine, pollers, hub, API.
pub struct Daemon {
    config: Config,
    store: Arc<Store>,
    hub: Hub,
    wake: WakeSignal,
    usage: UsageLimiter,
    shutdown: ShutdownSignal,
    dispatcher: Dispatcher,
    orchestrator: Arc<Orchestrator>,
    publisher: Arc<HubPublisher>,
    tracker: Arc<dyn TrackerClient>,
    host: Arc<dyn HostClient>,
    api_state: Arc<ApiState>,
}

impl Daemon {
    /// Open (or create) the store from config and assemble the daemon.
    pub async fn new(config: Config) -> Result<Self> {
        let db_path = expand_home(&config.store.path);
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }
        let store = Store::open(&db_path)
            .await
            .context("failed to open the issue store")?;
        Self::with_store(config, Arc::new(store))
    }

    /// Assemble the daemon around an existing store (tests use in-memory).
    pub fn with_store(config: Config, store: Arc<Store>) -> Result<Self> {
        let hub = Hub::new();
        let wake = WakeSignal::new();
        let usage = UsageLimiter::new();
        let shutdown = ShutdownSignal::new();
        let dispatcher = Dispatcher::new(config.daemon.max_workers);
        let publisher = Arc::new(HubPublisher::new(hub.clone()));

        let workspaces = Arc::new(WorkspaceManager::new(expand_home(
            &config.daemon.workspaces_root,
        )));

        let tracker_key = read_secret(&config.tracker.api_key_env);
        let tracker: Arc<dyn TrackerClient> =
            Arc::new(LinearClient::new(&config.tracker.api_url, tracker_key));

        let host_token = read_secret(&config.host.token_env);
        let host: Arc<dyn HostClient> = Arc::new(
            GitHubClient::new(host_token).context("building the code-host client")?,
        );

        let runner = Arc::new(CommandRunner::new(config.runner.clone(), workspaces.clone()));

        let ctx = Arc::new(ActionCtx {
            store: store.clone(),
            tracker: tracker.clone(),
            host: host.clone(),
            agent: runner.clone(),
            builder: runner,
            workspaces: workspaces.clone(),
            publisher: publisher.clone(),
        });

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(standard_machine()),
            dispatcher.clone(),
            ctx,
            usage.clone(),
            wake.clone(),
            publisher.clone(),
            Duration::from_secs(config.daemon.tick_secs),
        ));

        let mut api_state = ApiState::new(store.clone(), hub.clone(), wake.clone(), usage.clone())
            .with_checker(Arc::new(dispatcher.clone()))
            .with_workspace_remover(workspaces);
        if let Some(command) = &config.runner.cc_usage_command {
            api_state = api_state.with_cc_usage(Arc::new(CommandCcUsage::new(command.clone())));
        }

        Ok(Self {
            config,
            store,
            hub,
            wake,
            usage,
            shutdown,
            dispatcher,
            orchestrator,
            publisher,
            tracker,
            host,
            api_state: Arc::new(api_state),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.api_state
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn usage(&self) -> &UsageLimiter {
        &self.usage
    }

    /// Upsert `[[projects]]` config entries into the store, matched by name.
    pub async fn seed_projects(&self) -> Result<()> {
        for entry in &self.config.projects {
            match self.store.get_project_by_name(&entry.name).await {
                Ok(Some(existing)) => {
                    let updated = apply_project_config(existing, entry);
                    self.store
                        .update_project(&updated)
                        .await
                        .with_context(|| format!("updating project {}", entry.name))?;
                }
                Ok(None) => {
                    let project =
                        apply_project_config(Project::new(&entry.name, &entry.local_path), entry);
                    self.store
                        .create_project(&project)
                        .await
                        .with_context(|| format!("creating project {}", entry.name))?;
                    info!(project = %entry.name, "project registered");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("looking up project {}", entry.name))
                }
            }
        }
        Ok(())
    }

    /// Run the daemon to completion on a pre-bound listener (blocking).
    ///
    /// Startup order follows restart recovery: open store (done), recover
    /// persisted builds, then start pollers, loop, API, and hub traffic.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        self.seed_projects().await?;

        let recovered = self.orchestrator.recover_building().await;
        if recovered > 0 {
            info!(recovered, "re-dispatched persisted builds");
        }

        let tracker_poller = TrackerPoller::new(
            self.store.clone(),
            self.tracker.clone(),
            Some(self.publisher.clone() as Arc<dyn IngestSink>),
            self.wake.clone(),
            Duration::from_secs(self.config.tracker.poll_secs),
        );
        let host_poller = HostPoller::new(
            self.store.clone(),
            self.host.clone(),
            self.wake.clone(),
            Duration::from_secs(self.config.host.poll_secs),
        );

        let shutdown = self.shutdown.clone();
        let tracker_handle = tokio::spawn(async move { tracker_poller.run(shutdown).await });
        let shutdown = self.shutdown.clone();
        let host_handle = tokio::spawn(async move { host_poller.run(shutdown).await });

        let bind_addr = listener.local_addr()?;
        let router = api_router(self.api_state.clone());
        let api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });
        info!(%bind_addr, "control API listening");

        // The orchestrator loop runs inline until shutdown.
        self.orchestrator.run(self.shutdown.clone()).await;

        // Give in-flight workers a moment to observe cancellation and drain.
        if tokio::time::timeout(Duration::from_secs(10), self.dispatcher.wait_idle())
            .await
            .is_err()
        {
            warn!(
                active = self.dispatcher.active_count(),
                "workers still active at shutdown"
            );
        }

        api_handle.abort();
        tracker_handle.abort();
        host_handle.abort();
        info!("daemon stopped");
        Ok(())
    }
}

fn apply_project_config(mut project: Project, entry: &ProjectConfig) -> Project {
    project.local_path = entry.local_path.clone();
    project.tracker_team_id = entry.tracker_team_id.clone();
    project.tracker_assignee_id = entry.tracker_assignee_id.clone();
    project.host_owner = entry.host_owner.clone();
    project.host_repo = entry.host_repo.clone();
    project.default_branch = entry.default_branch.clone();
    project.branch_prefix = entry.branch_prefix.clone();
    project.max_build_iterations = entry.max_build_iterations;
    project.credential_profile = entry.credential_profile.clone();
    project
}

fn read_secret(env_var: &str) -> String {
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            warn!(env = env_var, "credential env var unset, client runs unauthenticated");
            String::new()
        }
    }
}

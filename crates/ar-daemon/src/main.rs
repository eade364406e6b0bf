//! autoralph daemon — drives tracker issues through refinement, build,
//! review, and completion, and serves the control API.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ar_core::config::Config;
use ar_core::lockfile::{AcquireResult, DaemonLockfile};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = Config::default_path();
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %config_path.display(), error = %e, "failed to load config, using defaults");
            Config::default()
        }
    };
    info!(
        projects = config.projects.len(),
        max_workers = config.daemon.max_workers,
        "autoralph daemon starting"
    );

    // --- Startup guard: one daemon at a time ---
    let replace_mode = std::env::args().any(|a| a == "--replace" || a == "-r");
    if let Some(existing) = DaemonLockfile::read_valid() {
        if replace_mode {
            info!(pid = existing.pid, "replacing existing daemon (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            // Let the old daemon clean up, then drop whatever it left behind.
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            DaemonLockfile::remove();
        } else {
            eprintln!(
                "autoralph daemon already running (pid={}, api={})\n\
                 \n  Hint: use --replace to restart it.",
                existing.pid,
                existing.api_url(),
            );
            std::process::exit(1);
        }
    }

    // --- Bind the API listener ---
    let bind_addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
    let port = listener.local_addr()?.port();

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        host: config.daemon.host.clone(),
        port,
        started_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    match lockfile.acquire().context("acquiring daemon lockfile")? {
        AcquireResult::Acquired => {}
        AcquireResult::AlreadyRunning(existing) => {
            eprintln!(
                "autoralph daemon already running (pid={}, api={})",
                existing.pid,
                existing.api_url()
            );
            std::process::exit(1);
        }
    }

    let daemon = ar_daemon::daemon::Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    let result = daemon.run_with_listener(listener).await;
    DaemonLockfile::remove();
    result
}

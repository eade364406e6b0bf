//! Daemon lockfile — single-instance guard and address discovery.
//!
//! The daemon writes a JSON lockfile to `~/.autoralph/daemon.lock` after
//! binding its listener. `acquire()` uses `O_CREAT | O_EXCL` so two racing
//! daemons have exactly one winner; `read_valid()` treats a lockfile whose
//! pid is no longer alive as stale and removes it.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockfile {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub started_at: String,
    pub version: String,
}

/// Result of trying to acquire the lockfile.
pub enum AcquireResult {
    /// We created the lockfile — we own it.
    Acquired,
    /// Another live daemon holds the lockfile.
    AlreadyRunning(DaemonLockfile),
}

impl DaemonLockfile {
    /// Canonical lockfile path: `~/.autoralph/daemon.lock`.
    pub fn path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".autoralph").join("daemon.lock")
    }

    /// Try to exclusively create and write the lockfile.
    pub fn acquire(&self) -> std::io::Result<AcquireResult> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                file.write_all(json.as_bytes())?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match Self::read_valid() {
                    Some(existing) => Ok(AcquireResult::AlreadyRunning(existing)),
                    None => {
                        // Stale lockfile was cleaned up — retry once.
                        self.acquire()
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Read the lockfile if it exists and its pid is still alive.
    ///
    /// A lockfile whose process is dead (crash, SIGKILL) is removed so the
    /// next daemon can start.
    pub fn read_valid() -> Option<DaemonLockfile> {
        let path = Self::path();
        let text = std::fs::read_to_string(&path).ok()?;
        let lockfile: DaemonLockfile = serde_json::from_str(&text).ok()?;
        if pid_alive(lockfile.pid) {
            Some(lockfile)
        } else {
            tracing::warn!(pid = lockfile.pid, "removing stale daemon lockfile");
            let _ = std::fs::remove_file(&path);
            None
        }
    }

    /// Remove the lockfile, ignoring errors.
    pub fn remove() {
        let _ = std::fs::remove_file(Self::path());
    }

    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes for existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

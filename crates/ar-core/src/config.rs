use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.autoralph/config.toml` (or the
/// path in `AUTORALPH_CONFIG`). Every section falls back to defaults when
/// absent so a bare file is enough to start the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Repositories under orchestration; upserted into the store at startup.
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("AUTORALPH_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autoralph")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fallback tick interval for the orchestrator loop.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Dispatcher slot count.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Directory the per-issue working trees are created under.
    #[serde(default = "default_workspaces_root")]
    pub workspaces_root: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tick_secs: default_tick_secs(),
            max_workers: default_max_workers(),
            workspaces_root: default_workspaces_root(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8910
}
fn default_tick_secs() -> u64 {
    10
}
fn default_max_workers() -> usize {
    3
}
fn default_workspaces_root() -> String {
    "~/.autoralph/workspaces".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.autoralph/autoralph.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_api_url")]
    pub api_url: String,
    /// Environment variable holding the tracker API key.
    #[serde(default = "default_tracker_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tracker_poll_secs")]
    pub poll_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: default_tracker_api_url(),
            api_key_env: default_tracker_key_env(),
            poll_secs: default_tracker_poll_secs(),
        }
    }
}

fn default_tracker_api_url() -> String {
    "https://api.linear.app/graphql".into()
}
fn default_tracker_key_env() -> String {
    "LINEAR_API_KEY".into()
}
fn default_tracker_poll_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Environment variable holding the code-host token.
    #[serde(default = "default_host_token_env")]
    pub token_env: String,
    #[serde(default = "default_host_poll_secs")]
    pub poll_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            token_env: default_host_token_env(),
            poll_secs: default_host_poll_secs(),
        }
    }
}

fn default_host_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_host_poll_secs() -> u64 {
    60
}

/// Commands the process-spawning runner adapter executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Build-loop command, run in the issue workspace.
    #[serde(default = "default_build_command")]
    pub build_command: String,
    /// Agent command for refinement / feedback / check-fix / rebase steps.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Substring in the command's stderr that signals provider rate
    /// exhaustion; triggers the usage-limit gate instead of a failure.
    #[serde(default = "default_usage_limit_marker")]
    pub usage_limit_marker: String,
    /// Optional command printing AI-provider usage as JSON; feeds
    /// `GET /api/cc-usage`.
    #[serde(default)]
    pub cc_usage_command: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            build_command: default_build_command(),
            agent_command: default_agent_command(),
            usage_limit_marker: default_usage_limit_marker(),
            cc_usage_command: None,
        }
    }
}

fn default_build_command() -> String {
    "autoralph-build".into()
}
fn default_agent_command() -> String {
    "autoralph-agent".into()
}
fn default_usage_limit_marker() -> String {
    "usage limit reached".into()
}

/// One `[[projects]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub local_path: String,
    pub tracker_team_id: String,
    pub tracker_assignee_id: String,
    pub host_owner: String,
    pub host_repo: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_max_build_iterations")]
    pub max_build_iterations: u32,
    #[serde(default = "default_credential_profile")]
    pub credential_profile: String,
}

fn default_branch() -> String {
    "main".into()
}
fn default_branch_prefix() -> String {
    "autoralph/".into()
}
fn default_max_build_iterations() -> u32 {
    5
}
fn default_credential_profile() -> String {
    "default".into()
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        return format!("{}/{}", home, rest);
    }
    path.to_string()
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// AI-provider usage as surfaced by `GET /api/cc-usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcUsage {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<serde_json::Value>,
}

impl CcUsage {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            groups: None,
        }
    }
}

/// Optional collaborator providing usage data. A `None` provider degrades
/// to `{ "available": false }`.
#[async_trait]
pub trait CcUsageProvider: Send + Sync {
    async fn usage(&self) -> CcUsage;
}

/// Runs a configured command and parses its stdout as the usage groups JSON.
pub struct CommandCcUsage {
    command: String,
}

impl CommandCcUsage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl CcUsageProvider for CommandCcUsage {
    async fn usage(&self) -> CcUsage {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                match serde_json::from_slice::<serde_json::Value>(&output.stdout) {
                    Ok(groups) => CcUsage {
                        available: true,
                        groups: Some(groups),
                    },
                    Err(e) => {
                        warn!(error = %e, "cc-usage command produced invalid JSON");
                        CcUsage::unavailable()
                    }
                }
            }
            Ok(output) => {
                warn!(status = ?output.status.code(), "cc-usage command failed");
                CcUsage::unavailable()
            }
            Err(e) => {
                warn!(error = %e, "cc-usage command could not be spawned");
                CcUsage::unavailable()
            }
        }
    }
}

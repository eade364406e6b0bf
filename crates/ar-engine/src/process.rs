//! Process-spawning adapter for the build loop and agent invocations.
//!
//! The actual build loop and AI invocation are external programs; this
//! adapter runs the configured commands, streams build output into the
//! activity log, kills the child on cancellation, and maps the configured
//! stderr marker to the usage-limit gate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ar_core::config::RunnerConfig;
use ar_core::types::{Issue, Project};

use crate::runner::{ActionError, AgentRunner, BuildEvents, BuildOutcome, BuildRunner};
use crate::workspace::WorkspaceManager;

/// Exit code by which the build loop reports an exhausted iteration budget.
const EXIT_EXHAUSTED: i32 = 10;

/// How long the usage-limit gate holds when the marker is seen and the
/// provider gave no explicit reset time.
const USAGE_LIMIT_BACKOFF_MINS: i64 = 15;

pub struct CommandRunner {
    config: RunnerConfig,
    workspaces: Arc<WorkspaceManager>,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig, workspaces: Arc<WorkspaceManager>) -> Self {
        Self { config, workspaces }
    }

    fn spawn(&self, command: &str, dir: &Path, envs: &[(&str, String)]) -> Result<Child, ActionError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in envs {
            cmd.env(key, value);
        }
        cmd.spawn()
            .map_err(|e| ActionError::Failed(format!("spawning `{command}`: {e}")))
    }

    fn workspace_dir(&self, project: &Project, issue: &Issue) -> PathBuf {
        self.workspaces.path_for(project, &issue.workspace_name)
    }

    fn issue_envs(&self, project: &Project, issue: &Issue) -> Vec<(&'static str, String)> {
        vec![
            ("AUTORALPH_ISSUE_ID", issue.id.to_string()),
            ("AUTORALPH_IDENTIFIER", issue.identifier.clone()),
            ("AUTORALPH_TITLE", issue.title.clone()),
            ("AUTORALPH_DESCRIPTION", issue.description.clone()),
            ("AUTORALPH_PLAN", issue.plan_text.clone().unwrap_or_default()),
            ("AUTORALPH_BRANCH", issue.branch_name.clone()),
            ("AUTORALPH_PR_NUMBER", issue.pr_number.to_string()),
            ("AUTORALPH_BASE_BRANCH", project.default_branch.clone()),
            (
                "AUTORALPH_MAX_ITERATIONS",
                project.max_build_iterations.to_string(),
            ),
            (
                "AUTORALPH_CREDENTIAL_PROFILE",
                project.credential_profile.clone(),
            ),
        ]
    }

    fn map_failure(&self, code: Option<i32>, stderr: &str) -> ActionError {
        if stderr.contains(&self.config.usage_limit_marker) {
            return ActionError::UsageLimited {
                until: Utc::now() + Duration::minutes(USAGE_LIMIT_BACKOFF_MINS),
            };
        }
        ActionError::Failed(format!(
            "command exited with code {}: {}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
            tail(stderr, 400)
        ))
    }

    /// Run an agent operation to completion and return its stdout.
    async fn run_agent_op(
        &self,
        op: &'static str,
        dir: &Path,
        project: &Project,
        issue: &Issue,
        extra: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<String, ActionError> {
        let mut envs = self.issue_envs(project, issue);
        envs.push(("AUTORALPH_OP", op.to_string()));
        envs.extend(extra.iter().cloned());

        let mut child = self.spawn(&self.config.agent_command, dir, &envs)?;
        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ActionError::Failed(format!("waiting for agent: {e}")))?
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ActionError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(self.map_failure(status.code(), &stderr));
        }
        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl BuildRunner for CommandRunner {
    async fn run_build(
        &self,
        project: &Project,
        issue: &Issue,
        events: &BuildEvents,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, ActionError> {
        let dir = self.workspace_dir(project, issue);
        let envs = self.issue_envs(project, issue);

        events.emit(issue, "build loop started").await;
        let mut child = self.spawn(&self.config.build_command, &dir, &envs)?;

        // Stream stdout lines into the build activity feed while the loop runs.
        let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(64);
        let stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        let stderr_task = drain(child.stderr.take());

        loop {
            tokio::select! {
                maybe_line = line_rx.recv() => match maybe_line {
                    Some(line) => events.emit(issue, line).await,
                    None => break, // stdout closed; the loop is winding down
                },
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    reader.abort();
                    return Err(ActionError::Cancelled);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ActionError::Failed(format!("waiting for build loop: {e}")))?
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ActionError::Cancelled);
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();

        match status.code() {
            Some(0) => {
                events.emit(issue, "build loop completed").await;
                info!(issue = %issue.identifier, "build loop completed");
                Ok(BuildOutcome::Completed)
            }
            Some(EXIT_EXHAUSTED) => {
                events.emit(issue, "build loop exhausted its iteration budget").await;
                Ok(BuildOutcome::ExhaustedIterations)
            }
            code => Err(self.map_failure(code, &stderr)),
        }
    }
}

#[async_trait]
impl AgentRunner for CommandRunner {
    async fn clarify(&self, project: &Project, issue: &Issue) -> Result<String, ActionError> {
        self.run_agent_op(
            "clarify",
            Path::new(&project.local_path),
            project,
            issue,
            &[],
            &CancellationToken::new(),
        )
        .await
    }

    async fn reply(
        &self,
        project: &Project,
        issue: &Issue,
        comment: &str,
    ) -> Result<String, ActionError> {
        self.run_agent_op(
            "reply",
            Path::new(&project.local_path),
            project,
            issue,
            &[("AUTORALPH_COMMENT", comment.to_string())],
            &CancellationToken::new(),
        )
        .await
    }

    async fn apply_feedback(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.run_agent_op(
            "apply_feedback",
            &self.workspace_dir(project, issue),
            project,
            issue,
            &[],
            cancel,
        )
        .await
        .map(|_| ())
    }

    async fn fix_checks(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.run_agent_op(
            "fix_checks",
            &self.workspace_dir(project, issue),
            project,
            issue,
            &[],
            cancel,
        )
        .await
        .map(|_| ())
    }

    async fn rebase(
        &self,
        project: &Project,
        issue: &Issue,
        cancel: &CancellationToken,
    ) -> Result<(), ActionError> {
        self.run_agent_op(
            "rebase",
            &self.workspace_dir(project, issue),
            project,
            issue,
            &[],
            cancel,
        )
        .await
        .map(|_| ())
    }
}

/// Read a pipe to the end on a background task.
fn drain<R>(pipe: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text.trim();
    }
    let start = text.len() - max;
    // Stay on a char boundary.
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(start);
    text[start..].trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_clips_long_output() {
        assert_eq!(tail("short", 400), "short");
        let long = "x".repeat(500);
        assert_eq!(tail(&long, 400).len(), 400);
    }
}

use std::path::PathBuf;

use tracing::{info, warn};

use ar_core::types::{Issue, Project};

use crate::runner::ActionError;

/// A created working tree.
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub name: String,
    pub branch: String,
    pub path: PathBuf,
}

/// Creates and removes per-issue working trees under a common root,
/// shelling out to `git worktree`.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the named workspace lives for a project.
    pub fn path_for(&self, project: &Project, name: &str) -> PathBuf {
        self.root.join(&project.name).join(name)
    }

    /// Ensure a working tree and branch exist for the issue. Re-entrant: an
    /// existing workspace directory is reused as-is.
    pub async fn create(&self, project: &Project, issue: &Issue) -> Result<WorkspaceInfo, ActionError> {
        let name = sanitize(&issue.identifier);
        let branch = format!("{}{}", project.branch_prefix, name);
        let path = self.path_for(project, &name);

        let info = WorkspaceInfo {
            name,
            branch,
            path: path.clone(),
        };

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(info);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ActionError::Failed(format!("creating workspace root: {e}")))?;
        }

        run_git(
            &project.local_path,
            &[
                "worktree",
                "add",
                "-B",
                &info.branch,
                path.to_str().unwrap_or_default(),
                &project.default_branch,
            ],
        )
        .await?;

        info!(
            issue = %issue.identifier,
            workspace = %info.name,
            branch = %info.branch,
            "workspace created"
        );
        Ok(info)
    }

    /// Remove the named working tree. Falls back to plain directory removal
    /// when git refuses.
    pub async fn remove(&self, project: &Project, name: &str) -> Result<(), ActionError> {
        let path = self.path_for(project, name);
        let path_str = path.to_str().unwrap_or_default().to_string();

        if let Err(e) = run_git(
            &project.local_path,
            &["worktree", "remove", "--force", &path_str],
        )
        .await
        {
            warn!(workspace = name, error = %e, "git worktree removal failed, deleting directory");
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| ActionError::Failed(format!("removing workspace: {e}")))?;
        }
        Ok(())
    }
}

async fn run_git(repo: &str, args: &[&str]) -> Result<(), ActionError> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .await
        .map_err(|e| ActionError::Failed(format!("spawning git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ActionError::Failed(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(())
}

/// Keep identifiers filesystem- and ref-safe.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .to_lowercase()
}

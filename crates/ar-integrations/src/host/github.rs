use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::Value;

use super::{HostClient, HostError, Result};
use crate::types::{CreatedPr, HostReview};

/// GitHub implementation of [`HostClient`] over octocrab.
///
/// Typed endpoints are used where octocrab models them; reviews, check runs,
/// and branch comparison go through raw routes.
#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
}

impl GitHubClient {
    /// An empty token builds an unauthenticated client (read-only rate
    /// limits apply).
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let octocrab = if token.is_empty() {
            Octocrab::builder().build()?
        } else {
            Octocrab::builder().personal_token(token).build()?
        };
        Ok(Self { octocrab })
    }

    async fn get_route(&self, route: String) -> Result<Value> {
        Ok(self.octocrab.get::<Value, _, _>(route, None::<&()>).await?)
    }
}

#[async_trait]
impl HostClient for GitHubClient {
    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<CreatedPr> {
        let pr = self
            .octocrab
            .pulls(owner, repo)
            .create(title, head, base)
            .body(body)
            .send()
            .await?;

        Ok(CreatedPr {
            number: pr.number,
            url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        })
    }

    async fn latest_review(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<HostReview>> {
        let reviews = self
            .get_route(format!("/repos/{owner}/{repo}/pulls/{pr_number}/reviews"))
            .await?;
        let reviews = reviews
            .as_array()
            .ok_or_else(|| HostError::Protocol("reviews response is not an array".into()))?;

        Ok(reviews.last().map(|review| HostReview {
            id: review
                .get("id")
                .map(|id| id.to_string())
                .unwrap_or_default(),
            changes_requested: review.get("state").and_then(Value::as_str)
                == Some("CHANGES_REQUESTED"),
        }))
    }

    async fn head_sha(&self, owner: &str, repo: &str, pr_number: u64) -> Result<String> {
        let pr = self.octocrab.pulls(owner, repo).get(pr_number).await?;
        Ok(pr.head.sha)
    }

    async fn checks_failing(&self, owner: &str, repo: &str, sha: &str) -> Result<bool> {
        let response = self
            .get_route(format!("/repos/{owner}/{repo}/commits/{sha}/check-runs"))
            .await?;
        let runs = response
            .get("check_runs")
            .and_then(Value::as_array)
            .ok_or_else(|| HostError::Protocol("malformed check-runs response".into()))?;

        Ok(runs.iter().any(|run| {
            matches!(
                run.get("conclusion").and_then(Value::as_str),
                Some("failure") | Some("timed_out") | Some("cancelled")
            )
        }))
    }

    async fn pr_merged(&self, owner: &str, repo: &str, pr_number: u64) -> Result<bool> {
        let pr = self.octocrab.pulls(owner, repo).get(pr_number).await?;
        Ok(pr.merged_at.is_some())
    }

    async fn base_advanced(&self, owner: &str, repo: &str, pr_number: u64) -> Result<bool> {
        let pr = self.octocrab.pulls(owner, repo).get(pr_number).await?;
        let base = pr.base.ref_field;
        let head = pr.head.sha;

        let comparison = self
            .get_route(format!("/repos/{owner}/{repo}/compare/{base}...{head}"))
            .await?;
        let behind_by = comparison
            .get("behind_by")
            .and_then(Value::as_u64)
            .ok_or_else(|| HostError::Protocol("malformed compare response".into()))?;
        Ok(behind_by > 0)
    }
}

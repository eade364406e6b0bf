//! Code-host client interface and the poller that watches open pull
//! requests for reviews, checks, merges, and base movement.

mod github;
mod poller;

pub use github::GitHubClient;
pub use poller::HostPoller;

use async_trait::async_trait;

use crate::types::{CreatedPr, HostReview};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host api error: {0}")]
    Api(#[from] octocrab::Error),
    #[error("host protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, HostError>;

/// The capability surface the kernel needs from the code host.
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<CreatedPr>;

    /// The newest review on the PR, if any reviews exist.
    async fn latest_review(&self, owner: &str, repo: &str, pr_number: u64)
        -> Result<Option<HostReview>>;

    /// Current head commit of the PR branch.
    async fn head_sha(&self, owner: &str, repo: &str, pr_number: u64) -> Result<String>;

    /// True when any check run for the given commit concluded unsuccessfully.
    async fn checks_failing(&self, owner: &str, repo: &str, sha: &str) -> Result<bool>;

    async fn pr_merged(&self, owner: &str, repo: &str, pr_number: u64) -> Result<bool>;

    /// True when the base branch has commits the PR head does not.
    async fn base_advanced(&self, owner: &str, repo: &str, pr_number: u64) -> Result<bool>;
}

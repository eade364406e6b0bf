//! External collaborators: the issue-tracker client, the code-host client,
//! the two pollers that translate their state into issue mutations, and the
//! cc-usage provider. The kernel consumes these only through the traits
//! defined here; concrete clients are wired in by the daemon.

pub mod cc_usage;
pub mod host;
pub mod tracker;
pub mod types;

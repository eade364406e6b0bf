//! Core library for autoralph — the durable data model, the SQLite store,
//! configuration, and the small shared signalling primitives (wake channel,
//! usage-limit gate, shutdown broadcast) the orchestration kernel is built on.

pub mod config;
pub mod lockfile;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod usage_limit;
pub mod wake;

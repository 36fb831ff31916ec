//! # Configuration Modules
//!
//! Immutable client configuration: endpoint, credentials, transport timeouts,
//! retry policy, and window size. Built once, then shared read-only by every
//! stream.

/// Client configuration, credential handling, and environment loading.
pub mod config_client;

pub use config_client::{ClientConfig, Credentials, RetryConfig};

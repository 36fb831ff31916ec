//! # lib_logshare
//!
//! Streaming client for the Cloudflare Logpull API. Records are requested by
//! time range or Ray ID and come back as NDJSON; this crate decodes them one
//! line at a time and exposes the result as a single `futures` stream, however
//! many HTTP requests are needed to cover the window.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use lib_logshare::{ClientConfig, LogClient, Query};
//!
//! # async fn run() -> Result<(), lib_logshare::LogshareError> {
//! let config = ClientConfig::from_env()?;
//! let client = LogClient::new(&config)?;
//! let query = Query::builder().time_range(1_700_000_000, 1_700_003_600).count(-1).build()?;
//!
//! let mut records = client.open("023e105f4ecef8ad9ca31a8372d0c353", &query).await?;
//! while let Some(record) = records.next().await {
//!     let record = record?;
//!     println!("{:?}", record.ray_id());
//! }
//! # Ok(())
//! # }
//! ```

// Declare the modules to re-export
pub mod configs;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod logpull;
pub mod retrieve;

// Re-export the public surface
pub use configs::{ClientConfig, Credentials, RetryConfig};
pub use error::{LogshareError, ResponseInfo, Result};
#[cfg(feature = "loggers")]
pub use loggers::{LoggerLocal, LoggerLocalOptions};
pub use logpull::{Count, LogRecord, Query, QueryBuilder, Selector, TimestampFormat};
pub use retrieve::{relay_ndjson, ApiClient, LogClient, RecordStream, StreamState};

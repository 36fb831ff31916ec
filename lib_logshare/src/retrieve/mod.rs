//! # Data Retrieval Module
//!
//! Everything between a [`crate::logpull::Query`] and a stream of decoded
//! records.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: The HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`. Performs one authenticated request, retries
//!   gateway failures with exponential backoff, and classifies non-2xx
//!   statuses. Returns the response body unread.
//! - **`ndjson`**: Incremental decoder turning a buffered body into
//!   `LogRecord`s one line at a time.
//! - **`retriever`**: `LogClient`, which splits a query into request
//!   windows and exposes every body as one continuous `RecordStream`.
//! - **`relay`**: Writes a record stream out as NDJSON.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// HTTP client for the Logpull endpoint with retry middleware.
pub mod ky_http;
/// Line-by-line NDJSON decoding with positional errors.
pub mod ndjson;
/// NDJSON output for record streams.
pub mod relay;
/// Multi-request streaming retriever.
pub mod retriever;

pub use ky_http::{ApiClient, BodyReader, Fetch};
pub use ndjson::NdjsonDecoder;
pub use relay::relay_ndjson;
pub use retriever::{split_window, LogClient, RecordStream, StreamState, WindowIter};

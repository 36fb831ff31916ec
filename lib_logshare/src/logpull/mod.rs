//! # Logpull Data Model
//!
//! The two types collaborators exchange with the retrieval core: the
//! [`Query`] describing what to fetch and the [`LogRecord`] yielded for each
//! decoded line.

/// Validated request parameters and their query-string encoding.
pub mod query;
/// Schema-less log record with typed accessors.
pub mod record;

pub use query::{Count, Query, QueryBuilder, Selector, TimestampFormat};
pub use record::LogRecord;

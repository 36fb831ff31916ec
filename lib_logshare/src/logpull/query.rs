//! # Logpull Query
//!
//! Request parameters for one retrieval. A [`Query`] is only obtainable through
//! [`QueryBuilder::build`], which enforces that exactly one selector (a Ray ID or
//! a `[start, end)` time range) is set and that the optional parameters are in
//! range. [`Query::to_params`] is the single place where the query string is
//! encoded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LogshareError, Result};

/// What to retrieve: one request by Ray ID, or every request in a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    RayId(String),
    /// Half-open interval `[start, end)` in Unix seconds.
    TimeRange { start: i64, end: i64 },
}

/// Upper bound on the number of records returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Count {
    /// Every record in the window. Encoded as `-1`.
    #[default]
    Unbounded,
    Limit(u64),
}

impl Count {
    pub fn limit(&self) -> Option<u64> {
        match self {
            Count::Unbounded => None,
            Count::Limit(n) => Some(*n),
        }
    }

    fn encode(&self) -> String {
        match self {
            Count::Unbounded => "-1".to_string(),
            Count::Limit(n) => n.to_string(),
        }
    }
}

impl From<i64> for Count {
    /// Negative values are the unbounded sentinel.
    fn from(n: i64) -> Self {
        if n < 0 {
            Count::Unbounded
        } else {
            Count::Limit(n as u64)
        }
    }
}

/// Format of the timestamp fields in returned records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    Unix,
    UnixNano,
    Rfc3339,
}

impl TimestampFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampFormat::Unix => "unix",
            TimestampFormat::UnixNano => "unixnano",
            TimestampFormat::Rfc3339 => "rfc3339",
        }
    }
}

impl std::str::FromStr for TimestampFormat {
    type Err = LogshareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unix" => Ok(TimestampFormat::Unix),
            "unixnano" => Ok(TimestampFormat::UnixNano),
            "rfc3339" => Ok(TimestampFormat::Rfc3339),
            other => Err(LogshareError::InvalidQuery(format!("unknown timestamp format {other:?}"))),
        }
    }
}

/// A validated Logpull query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    selector: Selector,
    count: Count,
    sample: Option<f64>,
    fields: Vec<String>,
    timestamp_format: Option<TimestampFormat>,
}

impl Query {
    /// Starts an empty builder; see [`QueryBuilder::build`] for the rules.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Ray ID or time range.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Record limit for the whole query, across every window.
    pub fn count(&self) -> Count {
        self.count
    }

    /// Sampling fraction, when set.
    pub fn sample(&self) -> Option<f64> {
        self.sample
    }

    /// Requested field names. Empty means the API's default set.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Requested timestamp encoding, when set.
    pub fn timestamp_format(&self) -> Option<TimestampFormat> {
        self.timestamp_format
    }

    /// Same query, narrowed to a sub-window and a tighter count.
    ///
    /// Used by the retriever when one logical window needs several fetches.
    pub(crate) fn with_window(&self, start: i64, end: i64, count: Count) -> Query {
        Query {
            selector: Selector::TimeRange { start, end },
            count,
            ..self.clone()
        }
    }

    pub(crate) fn with_count(&self, count: Count) -> Query {
        Query { count, ..self.clone() }
    }

    /// Encodes the query string parameters in the order the API documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(6);
        match &self.selector {
            Selector::RayId(id) => params.push(("ray_id", id.clone())),
            Selector::TimeRange { start, end } => {
                params.push(("start", start.to_string()));
                params.push(("end", end.to_string()));
            }
        }
        params.push(("count", self.count.encode()));
        if let Some(sample) = self.sample {
            params.push(("sample", sample.to_string()));
        }
        if !self.fields.is_empty() {
            params.push(("fields", self.fields.join(",")));
        }
        if let Some(format) = self.timestamp_format {
            params.push(("timestamp_format", format.as_str().to_string()));
        }
        params
    }
}

/// Collects query parameters and validates them in [`QueryBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    ray_id: Option<String>,
    range: Option<(i64, i64)>,
    count: Count,
    sample: Option<f64>,
    fields: Vec<String>,
    timestamp_format: Option<TimestampFormat>,
}

impl QueryBuilder {
    pub fn ray_id(mut self, ray_id: impl Into<String>) -> Self {
        self.ray_id = Some(ray_id.into());
        self
    }

    /// Sets the `[start, end)` window in Unix seconds.
    pub fn time_range(mut self, start: i64, end: i64) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn time_range_utc(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range(start.timestamp(), end.timestamp())
    }

    pub fn count(mut self, count: impl Into<Count>) -> Self {
        self.count = count.into();
        self
    }

    pub fn sample(mut self, sample: f64) -> Self {
        self.sample = Some(sample);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = Some(format);
        self
    }

    pub fn build(self) -> Result<Query> {
        let selector = match (self.ray_id, self.range) {
            (Some(_), Some(_)) => {
                return Err(LogshareError::InvalidQuery(
                    "ray id and time range are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(LogshareError::InvalidQuery(
                    "either a ray id or a time range is required".into(),
                ))
            }
            (Some(id), None) => {
                let id = id.trim().to_string();
                if id.is_empty() {
                    return Err(LogshareError::InvalidQuery("ray id must not be empty".into()));
                }
                Selector::RayId(id)
            }
            (None, Some((start, end))) => {
                if start >= end {
                    return Err(LogshareError::InvalidQuery(format!(
                        "start ({start}) must be earlier than end ({end})"
                    )));
                }
                Selector::TimeRange { start, end }
            }
        };

        if let Some(sample) = self.sample {
            if !(sample > 0.0 && sample <= 1.0) {
                return Err(LogshareError::InvalidQuery(format!(
                    "sample must be in (0, 1], got {sample}"
                )));
            }
        }

        for field in &self.fields {
            if field.is_empty() || field.contains(',') {
                return Err(LogshareError::InvalidQuery(format!("invalid field name {field:?}")));
            }
        }

        Ok(Query {
            selector,
            count: self.count,
            sample: self.sample,
            fields: self.fields,
            timestamp_format: self.timestamp_format,
        })
    }
}

//! # Streaming Retriever
//!
//! Presents one continuous stream of [`LogRecord`]s for a [`Query`], however
//! many requests are needed underneath. Time ranges wider than the configured
//! maximum window are split into consecutive sub-windows and fetched one
//! after another; each response body is decoded line by line while it is
//! still arriving.
//!
//! ## Resource discipline
//! Exactly one response body is open at a time and it is owned by the
//! stream. Dropping the [`RecordStream`], whether after exhaustion, an error,
//! or midway through, drops the body and with it the connection.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::ky_http::{ApiClient, BodyReader, Fetch};
use super::ndjson::NdjsonDecoder;
use crate::configs::ClientConfig;
use crate::error::Result;
use crate::logpull::{Count, LogRecord, Query, Selector};

/// Lifecycle of a single stream.
///
/// `NotStarted -> Fetching -> Decoding <-> Yielding -> (Exhausted | Failed)`,
/// with `Fetching` re-entered once per additional window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Created but never polled.
    NotStarted = 0,
    /// A request is in flight.
    Fetching = 1,
    /// Reading the next line of an open body.
    Decoding = 2,
    /// A record has been handed to the consumer.
    Yielding = 3,
    /// Every window was read, or the count was reached.
    Exhausted = 4,
    /// An error was yielded; nothing follows it.
    Failed = 5,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StreamState::NotStarted,
            1 => StreamState::Fetching,
            2 => StreamState::Decoding,
            3 => StreamState::Yielding,
            4 => StreamState::Exhausted,
            _ => StreamState::Failed,
        }
    }
}

/// Counters shared between the generator and the [`RecordStream`] handle.
#[derive(Debug)]
struct Progress {
    state: AtomicU8,
    records: AtomicU64,
    requests: AtomicU64,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::NotStarted as u8),
            records: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    fn set(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

/// One request worth of work: either the whole query or a sub-window of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Whole,
    Range(i64, i64),
}

/// Splits `[start, end)` into consecutive windows of at most `max` seconds.
/// The windows cover the interval exactly, without gaps or overlap.
///
/// Windows are produced on demand, so the width of the range costs nothing
/// until a window is actually requested.
pub fn split_window(start: i64, end: i64, max: i64) -> WindowIter {
    WindowIter {
        next_start: start,
        end,
        max: max.max(1),
    }
}

/// Lazy cursor over the sub-windows of a time range. See [`split_window`].
#[derive(Debug, Clone)]
pub struct WindowIter {
    next_start: i64,
    end: i64,
    max: i64,
}

impl Iterator for WindowIter {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        if self.next_start >= self.end {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.max).min(self.end);
        self.next_start = end;
        Some((start, end))
    }
}

/// The windows still to be fetched for one stream.
#[derive(Debug)]
enum Plan {
    Done,
    Whole,
    Ranges(WindowIter),
}

impl Iterator for Plan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        match self {
            Plan::Done => None,
            Plan::Whole => {
                *self = Plan::Done;
                Some(Window::Whole)
            }
            Plan::Ranges(windows) => windows.next().map(|(s, e)| Window::Range(s, e)),
        }
    }
}

fn plan(query: &Query, max_window_secs: i64) -> Plan {
    if query.count() == Count::Limit(0) {
        return Plan::Done;
    }
    match query.selector() {
        Selector::RayId(_) => Plan::Whole,
        Selector::TimeRange { start, end } => Plan::Ranges(split_window(*start, *end, max_window_secs)),
    }
}

fn window_query(base: &Query, window: Window, count: Count) -> Query {
    match window {
        Window::Whole => base.with_count(count),
        Window::Range(s, e) => base.with_window(s, e, count),
    }
}

/// Count to request for the next window, given what has been emitted so far.
fn remaining(limit: Option<u64>, emitted: u64) -> Count {
    match limit {
        Some(l) => Count::Limit(l.saturating_sub(emitted)),
        None => Count::Unbounded,
    }
}

/// Lazy, single-pass stream of decoded records.
///
/// Yields `Ok(record)` until the query is exhausted or its count is reached.
/// The first `Err` is also the last item.
pub struct RecordStream {
    inner: Pin<Box<dyn Stream<Item = Result<LogRecord>> + Send>>,
    progress: Arc<Progress>,
}

impl RecordStream {
    /// Where the stream currently is in its lifecycle.
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.progress.state.load(Ordering::Relaxed))
    }

    /// Records handed to the consumer so far.
    pub fn records_yielded(&self) -> u64 {
        self.progress.records.load(Ordering::Relaxed)
    }

    /// Number of requests issued so far, including the one currently open.
    pub fn requests_made(&self) -> u64 {
        self.progress.requests.load(Ordering::Relaxed)
    }
}

impl Stream for RecordStream {
    type Item = Result<LogRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("state", &self.state())
            .field("records_yielded", &self.records_yielded())
            .field("requests_made", &self.requests_made())
            .finish()
    }
}

fn record_stream<F: Fetch>(
    source: Arc<F>,
    zone_id: String,
    query: Query,
    mut windows: Plan,
    mut first: Option<BodyReader>,
    progress: Arc<Progress>,
) -> RecordStream {
    let p = Arc::clone(&progress);
    let limit = query.count().limit();

    let inner = stream! {
        let mut emitted: u64 = 0;
        let mut window_no = 0usize;

        loop {
            if limit.is_some_and(|l| emitted >= l) {
                break;
            }
            window_no += 1;

            // `open` has already fetched the first window.
            let body = match first.take() {
                Some(body) => body,
                None => {
                    let window = match windows.next() {
                        Some(window) => window,
                        None => break,
                    };
                    let request = window_query(&query, window, remaining(limit, emitted));
                    p.set(StreamState::Fetching);
                    p.requests.fetch_add(1, Ordering::Relaxed);
                    debug!(zone = %zone_id, window = window_no, ?window, "fetching window");
                    match source.fetch(&zone_id, &request).await {
                        Ok(body) => body,
                        Err(e) => {
                            p.set(StreamState::Failed);
                            warn!(zone = %zone_id, window = window_no, error = %e, "log fetch failed");
                            yield Err(e);
                            return;
                        }
                    }
                }
            };

            p.set(StreamState::Decoding);
            let mut decoder = NdjsonDecoder::with_start_index(body, emitted);
            loop {
                match decoder.next_record().await {
                    Ok(Some(record)) => {
                        emitted += 1;
                        p.records.fetch_add(1, Ordering::Relaxed);
                        p.set(StreamState::Yielding);
                        yield Ok(record);
                        if limit.is_some_and(|l| emitted >= l) {
                            break;
                        }
                        p.set(StreamState::Decoding);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        p.set(StreamState::Failed);
                        warn!(zone = %zone_id, window = window_no, error = %e, "log stream aborted");
                        yield Err(e);
                        return;
                    }
                }
            }
            debug!(window = window_no, bytes = decoder.bytes_read(), records = emitted, "window done");
        }

        p.set(StreamState::Exhausted);
        info!(zone = %zone_id, records = emitted, requests = p.requests.load(Ordering::Relaxed), "log stream exhausted");
    };

    RecordStream {
        inner: Box::pin(inner),
        progress,
    }
}

/// Entry point for retrieving logs.
///
/// Generic over the [`Fetch`] implementation so the streaming logic can run
/// against any body source; production code uses [`ApiClient`].
pub struct LogClient<F = ApiClient> {
    source: Arc<F>,
    max_window_secs: i64,
}

impl<F> Clone for LogClient<F> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            max_window_secs: self.max_window_secs,
        }
    }
}

impl LogClient<ApiClient> {
    /// Builds an HTTP-backed client.
    ///
    /// # Arguments
    /// * `config` - Endpoint, credentials, transport and retry settings. The
    ///   window size is taken from `max_window_secs`.
    ///
    /// # Errors
    /// Returns [`crate::LogshareError::EmptyCredentials`] or
    /// [`crate::LogshareError::Config`] when the configuration is invalid.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self::with_source(ApiClient::new(config)?, config.max_window_secs))
    }
}

impl<F: Fetch> LogClient<F> {
    /// Wraps any [`Fetch`] implementation.
    ///
    /// # Arguments
    /// * `source` - Performs the individual requests.
    /// * `max_window_secs` - Longest time range fetched in one request.
    pub fn with_source(source: F, max_window_secs: i64) -> Self {
        Self {
            source: Arc::new(source),
            max_window_secs,
        }
    }

    /// Returns a lazy stream; nothing is sent until it is first polled.
    /// Request failures arrive as the stream's first item.
    pub fn stream(&self, zone_id: &str, query: &Query) -> RecordStream {
        let windows = plan(query, self.max_window_secs);
        record_stream(
            Arc::clone(&self.source),
            zone_id.to_string(),
            query.clone(),
            windows,
            None,
            Arc::new(Progress::new()),
        )
    }

    /// Issues the first request before returning, so authentication and
    /// availability errors surface from this call rather than from the stream.
    pub async fn open(&self, zone_id: &str, query: &Query) -> Result<RecordStream> {
        let mut windows = plan(query, self.max_window_secs);
        let progress = Arc::new(Progress::new());

        let first = match windows.next() {
            Some(window) => {
                progress.set(StreamState::Fetching);
                progress.requests.fetch_add(1, Ordering::Relaxed);
                let request = window_query(query, window, query.count());
                match self.source.fetch(zone_id, &request).await {
                    Ok(body) => Some(body),
                    Err(e) => {
                        warn!(zone = %zone_id, error = %e, "log fetch failed");
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok(record_stream(
            Arc::clone(&self.source),
            zone_id.to_string(),
            query.clone(),
            windows,
            first,
            progress,
        ))
    }

    /// Buffers the whole result. Intended for ray-id lookups and small,
    /// counted queries.
    pub async fn collect(&self, zone_id: &str, query: &Query) -> Result<Vec<LogRecord>> {
        let mut stream = self.stream(zone_id, query);
        let mut records = Vec::new();
        while let Some(record) = stream.next().await {
            records.push(record?);
        }
        Ok(records)
    }
}

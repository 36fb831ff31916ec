//! # Mock Logpull Server
//!
//! A local `axum` server standing in for the Logpull endpoint, so the
//! integration tests exercise the real `reqwest` client end to end without
//! touching the network.
//!
//! Each test supplies a responder closure that sees the incoming request and
//! decides the reply: a status code plus the body as a list of chunks. A reply
//! can hold back everything after its first chunk until the test releases a
//! gate, and can report when the server side of the body is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// What the server saw for one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub zone: String,
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
}

impl SeenRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }
}

/// How to answer one request.
#[derive(Default)]
pub struct Reply {
    pub status: u16,
    pub chunks: Vec<String>,
    /// Chunks after the first are withheld until this is notified.
    pub gate: Option<Arc<Notify>>,
    /// Incremented when the server drops the response body, whether it was
    /// fully sent or the client went away.
    pub dropped: Option<Arc<AtomicUsize>>,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, chunks: vec![body.into()], ..Self::default() }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self { status, chunks: vec![body.into()], ..Self::default() }
    }

    pub fn chunked(chunks: Vec<String>) -> Self {
        Self { status: 200, chunks, ..Self::default() }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn track_drop(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.dropped = Some(counter);
        self
    }
}

/// NDJSON body with one `{"RayID": id}` object per id.
pub fn ndjson(ids: &[&str]) -> String {
    ids.iter().map(|id| format!("{{\"RayID\":\"{}\"}}\n", id)).collect()
}

type Responder = dyn Fn(&SeenRequest, usize) -> Reply + Send + Sync;

struct MockState {
    responder: Box<Responder>,
    seen: Mutex<Vec<SeenRequest>>,
}

struct DropCounter(Option<Arc<AtomicUsize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        if let Some(counter) = &self.0 {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct MockLogpull {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockLogpull {
    /// Binds to an ephemeral port and serves until the test runtime stops.
    ///
    /// The responder receives the request and its 0-based sequence number.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&SeenRequest, usize) -> Reply + Send + Sync + 'static,
    {
        let state = Arc::new(MockState {
            responder: Box::new(responder),
            seen: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/client/v4/zones/{zone}/logs/received", get(logs))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}/client/v4/", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().expect("seen lock").clone()
    }
}

async fn logs(
    State(state): State<Arc<MockState>>,
    Path(zone): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let seen = SeenRequest { zone, params, headers };
    let n = {
        let mut all = state.seen.lock().expect("seen lock");
        all.push(seen.clone());
        all.len() - 1
    };
    let reply = (state.responder)(&seen, n);

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let chunks = reply.chunks;
    let gate = reply.gate;
    let guard = DropCounter(reply.dropped);

    let body = async_stream::stream! {
        let _guard = guard;
        for (i, chunk) in chunks.into_iter().enumerate() {
            if i == 1 {
                if let Some(gate) = &gate {
                    gate.notified().await;
                }
            }
            yield Ok::<Bytes, std::io::Error>(Bytes::from(chunk));
        }
    };

    Response::builder()
        .status(status)
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

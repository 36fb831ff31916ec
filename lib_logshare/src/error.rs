//! # Error Types
//!
//! Every failure the client can produce, from query validation through HTTP
//! status classification to NDJSON decoding, is a variant of [`LogshareError`].
//! Errors are surfaced to the stream consumer at the point they occur.

use serde::Deserialize;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LogshareError>;

#[derive(Debug, Error)]
pub enum LogshareError {
    /// Client-side validation failure. Never sent over the network.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid credentials information provided")]
    EmptyCredentials,

    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP 401.
    #[error("HTTP status {status}: invalid credentials")]
    Auth { status: u16 },

    /// HTTP 403.
    #[error("HTTP status {status}: insufficient permissions")]
    Permission { status: u16 },

    /// Gateway and edge failures (502, 503, 504, 522, 523, 524). Safe to retry.
    #[error("HTTP status {status}: service failure")]
    Transient { status: u16 },

    /// Any other non-2xx response.
    #[error("HTTP status {status}: content {body:?}")]
    Api { status: u16, body: String },

    /// A line of the response body was not a JSON object.
    #[error("malformed record #{index} at byte offset {offset}: {source}")]
    Decode {
        index: u64,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// A line ran past the decoder's limit without a newline.
    #[error("record #{index} at byte offset {offset} exceeds {max} bytes without a newline")]
    LineTooLong { index: u64, offset: u64, max: usize },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest_middleware::Error),

    #[error("I/O error while reading response body: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A code and message returned by the API inside an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseInfo {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ResponseInfo>,
}

/// Gateway and edge statuses that indicate the request may succeed if repeated.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504 | 522 | 523 | 524)
}

/// Timeouts, refused connections and bodies cut off mid-transfer.
fn is_transient_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body()
}

impl From<reqwest::Error> for LogshareError {
    fn from(e: reqwest::Error) -> Self {
        LogshareError::Http(reqwest_middleware::Error::Reqwest(e))
    }
}

impl LogshareError {
    /// Maps a non-success HTTP status to its error kind.
    ///
    /// 401 and 403 are fatal, the gateway family is transient, and everything
    /// else is reported verbatim with the response body for diagnostics.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => LogshareError::Auth { status },
            403 => LogshareError::Permission { status },
            s if is_transient_status(s) => LogshareError::Transient { status },
            _ => LogshareError::Api { status, body },
        }
    }

    /// True for errors a caller may reasonably retry with the same query.
    pub fn is_transient(&self) -> bool {
        match self {
            LogshareError::Transient { .. } => true,
            LogshareError::Http(reqwest_middleware::Error::Reqwest(e)) => is_transient_transport(e),
            // Body reads surface as I/O errors wrapping the transport error.
            LogshareError::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(is_transient_transport),
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            LogshareError::Auth { status }
            | LogshareError::Permission { status }
            | LogshareError::Transient { status }
            | LogshareError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parses the `errors` array of a Cloudflare error envelope out of an
    /// [`LogshareError::Api`] body. Returns an empty list for any other
    /// variant or for bodies that are not an envelope.
    pub fn api_messages(&self) -> Vec<ResponseInfo> {
        match self {
            LogshareError::Api { body, .. } => serde_json::from_str::<ErrorEnvelope>(body)
                .map(|env| env.errors)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(LogshareError::from_status(401, String::new()), LogshareError::Auth { status: 401 }));
        assert!(matches!(LogshareError::from_status(403, String::new()), LogshareError::Permission { status: 403 }));
        for code in [502, 503, 504, 522, 523, 524] {
            let err = LogshareError::from_status(code, String::new());
            assert!(err.is_transient(), "{code} should be transient");
            assert_eq!(err.status(), Some(code));
        }
        match LogshareError::from_status(400, "bad".into()) {
            LogshareError::Api { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!LogshareError::from_status(500, String::new()).is_transient());
    }

    #[tokio::test]
    async fn transport_failures_are_transient_even_inside_io_errors() {
        let refused = reqwest::get("http://127.0.0.1:1/").await.unwrap_err();
        assert!(refused.is_connect());

        let wrapped = LogshareError::Io(std::io::Error::other(refused));
        assert!(wrapped.is_transient());
        assert!(wrapped.status().is_none());

        let plain = LogshareError::Io(std::io::Error::other("disk full"));
        assert!(!plain.is_transient());
        assert!(!LogshareError::LineTooLong { index: 0, offset: 0, max: 1 }.is_transient());
    }

    #[test]
    fn api_messages_from_envelope() {
        let body = r#"{"success":false,"errors":[{"code":1009,"message":"start must be earlier than end"}],"messages":[]}"#;
        let err = LogshareError::from_status(400, body.to_string());
        let messages = err.api_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code, 1009);
        assert_eq!(messages[0].message, "start must be earlier than end");

        let err = LogshareError::from_status(400, "not json".to_string());
        assert!(err.api_messages().is_empty());
        assert!(LogshareError::Auth { status: 401 }.api_messages().is_empty());
    }

    #[test]
    fn display_messages() {
        assert_eq!(LogshareError::Auth { status: 401 }.to_string(), "HTTP status 401: invalid credentials");
        assert_eq!(LogshareError::Transient { status: 503 }.to_string(), "HTTP status 503: service failure");
        assert_eq!(
            LogshareError::Api { status: 418, body: "teapot".into() }.to_string(),
            "HTTP status 418: content \"teapot\""
        );
    }
}

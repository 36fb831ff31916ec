//! # HTTP Retrieval Utilities
//!
//! One authenticated GET against the Logpull endpoint per call. The client is
//! built on `reqwest` with `reqwest-middleware`, so transient gateway failures
//! can be retried with exponential backoff before the caller sees them. A
//! successful response is handed back unread, as a buffered byte reader over
//! the live body; non-2xx responses are classified into [`LogshareError`].

use std::future::Future;
use std::pin::Pin;

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, policies::ExponentialBackoff, Retryable, RetryableStrategy,
    RetryTransientMiddleware,
};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

use crate::configs::ClientConfig;
use crate::error::{is_transient_status, LogshareError, Result};
use crate::logpull::Query;

/// Error bodies are kept for diagnostics only, so they are cut off here.
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// An open response body. Dropping it closes the underlying connection.
pub type BodyReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Anything that can perform one Logpull request and hand back the open body.
///
/// [`ApiClient`] is the HTTP implementation; the retriever only depends on
/// this trait.
pub trait Fetch: Send + Sync + 'static {
    /// Performs one request for `query` and returns the open body.
    ///
    /// # Errors
    /// Any status or transport failure, classified into [`LogshareError`].
    fn fetch(&self, zone_id: &str, query: &Query) -> impl Future<Output = Result<BodyReader>> + Send;
}

/// Retries only the statuses the API documents as transient, plus
/// connection-level failures. 500 and 4xx go straight to the caller.
struct TransientStatusStrategy;

impl RetryableStrategy for TransientStatusStrategy {
    fn handle(&self, res: &std::result::Result<reqwest::Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Ok(response) if is_transient_status(response.status().as_u16()) => Some(Retryable::Transient),
            Ok(_) => None,
            Err(error) => default_on_request_failure(error),
        }
    }
}

/// HTTP client for the Logpull API.
///
/// Holds no per-request state; one instance can serve any number of
/// concurrent streams.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Builds a client from a validated configuration.
    ///
    /// Extra headers are installed first and authentication headers after, so
    /// credentials cannot be shadowed by a caller-supplied header.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.validate()?;

        let mut headers = HeaderMap::new();
        for (name, value) in config
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .chain(config.credentials.headers())
        {
            let h_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LogshareError::Config(format!("header name {name:?}: {e}")))?;
            let mut h_value = HeaderValue::from_str(&value)
                .map_err(|e| LogshareError::Config(format!("header {name:?}: {e}")))?;
            if name.starts_with("authorization") || name.starts_with("x-auth-") {
                h_value.set_sensitive(true);
            }
            headers.insert(h_name, h_value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let mut middleware = ClientBuilder::new(client);
        if config.retry.max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder()
                .retry_bounds(config.retry.min_backoff(), config.retry.max_backoff())
                .build_with_max_retries(config.retry.max_retries);
            middleware = middleware.with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientStatusStrategy,
            ));
        }

        Ok(Self {
            inner: middleware.build(),
            base_url,
        })
    }

    /// `{base}/zones/{zone_id}/logs/received`
    pub fn logs_url(&self, zone_id: &str) -> Result<Url> {
        let zone_id = zone_id.trim();
        if zone_id.is_empty() || zone_id.contains('/') {
            return Err(LogshareError::InvalidQuery(format!("invalid zone id {zone_id:?}")));
        }
        Ok(self.base_url.join(&format!("zones/{}/logs/received", zone_id))?)
    }

    /// Sends the request and returns the unread body on a 2xx status.
    pub async fn request(&self, zone_id: &str, query: &Query) -> Result<BodyReader> {
        let url = self.logs_url(zone_id)?;
        let params = query.to_params();
        debug!(url = %url, params = ?params, "requesting logs");

        let response = self.inner.get(url).query(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = read_error_body(response).await;
            let err = LogshareError::from_status(status.as_u16(), body);
            warn!(status = status.as_u16(), error = %err, "log request rejected");
            return Err(err);
        }

        debug!(status = status.as_u16(), "log response body open");
        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(bytes)))
    }
}

impl Fetch for ApiClient {
    fn fetch(&self, zone_id: &str, query: &Query) -> impl Future<Output = Result<BodyReader>> + Send {
        self.request(zone_id, query)
    }
}

/// Reads at most [`MAX_ERROR_BODY_BYTES`] of a failed response. Read errors
/// are ignored; the status code is what matters.
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::Credentials;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&ClientConfig::new(Credentials::token("t")).with_base_url(base)).unwrap()
    }

    #[test]
    fn joins_logs_path_under_base() {
        let c = client("https://api.cloudflare.com/client/v4");
        assert_eq!(
            c.logs_url("023e105f4ecef8ad9ca31a8372d0c353").unwrap().as_str(),
            "https://api.cloudflare.com/client/v4/zones/023e105f4ecef8ad9ca31a8372d0c353/logs/received"
        );
    }

    #[test]
    fn rejects_bad_zone_ids() {
        let c = client("http://127.0.0.1:1/");
        assert!(matches!(c.logs_url(""), Err(LogshareError::InvalidQuery(_))));
        assert!(matches!(c.logs_url("a/../b"), Err(LogshareError::InvalidQuery(_))));
    }

    #[test]
    fn rejects_empty_credentials_and_bad_headers() {
        assert!(matches!(
            ApiClient::new(&ClientConfig::new(Credentials::key_email("k", ""))),
            Err(LogshareError::EmptyCredentials)
        ));
        assert!(matches!(
            ApiClient::new(&ClientConfig::new(Credentials::token("t")).with_header("bad header", "v")),
            Err(LogshareError::Config(_))
        ));
    }

    #[test]
    fn strategy_retries_only_gateway_statuses() {
        let strategy = TransientStatusStrategy;
        let response = |code: u16| -> std::result::Result<reqwest::Response, reqwest_middleware::Error> {
            let http = http::Response::builder().status(code).body("").unwrap();
            Ok(reqwest::Response::from(http))
        };
        assert!(matches!(strategy.handle(&response(503)), Some(Retryable::Transient)));
        assert!(matches!(strategy.handle(&response(524)), Some(Retryable::Transient)));
        assert!(strategy.handle(&response(500)).is_none());
        assert!(strategy.handle(&response(401)).is_none());
        assert!(strategy.handle(&response(200)).is_none());
    }
}

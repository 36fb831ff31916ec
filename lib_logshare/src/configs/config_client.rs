use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LogshareError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4/";

/// Logpull rejects windows longer than one hour.
pub const DEFAULT_MAX_WINDOW_SECS: i64 = 3600;

const ENV_API_TOKEN: &str = "CF_API_TOKEN";
const ENV_API_KEY: &str = "CF_API_KEY";
const ENV_API_EMAIL: &str = "CF_API_EMAIL";
const ENV_USER_SERVICE_KEY: &str = "CF_API_USER_SERVICE_KEY";
const ENV_BASE_URL: &str = "CF_API_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "LOGSHARE_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "LOGSHARE_MAX_RETRIES";
const ENV_MAX_WINDOW_SECS: &str = "LOGSHARE_MAX_WINDOW_SECS";

/// How requests authenticate against the API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Scoped API token, sent as `Authorization: Bearer`.
    Token { token: String },
    /// Global API key with the account email.
    KeyEmail { key: String, email: String },
    /// Origin CA user-service key.
    UserServiceKey { key: String },
}

impl Credentials {
    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token { token: token.into() }
    }

    pub fn key_email(key: impl Into<String>, email: impl Into<String>) -> Self {
        Credentials::KeyEmail { key: key.into(), email: email.into() }
    }

    pub fn user_service_key(key: impl Into<String>) -> Self {
        Credentials::UserServiceKey { key: key.into() }
    }

    fn is_complete(&self) -> bool {
        match self {
            Credentials::Token { token } => !token.is_empty(),
            Credentials::KeyEmail { key, email } => !key.is_empty() && !email.is_empty(),
            Credentials::UserServiceKey { key } => !key.is_empty(),
        }
    }

    /// Header name/value pairs carrying these credentials.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Credentials::Token { token } => vec![("authorization", format!("Bearer {}", token))],
            Credentials::KeyEmail { key, email } => {
                vec![("x-auth-key", key.clone()), ("x-auth-email", email.clone())]
            }
            Credentials::UserServiceKey { key } => vec![("x-auth-user-service-key", key.clone())],
        }
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token { .. } => f.write_str("Token(***)"),
            Credentials::KeyEmail { email, .. } => write!(f, "KeyEmail(***, {})", email),
            Credentials::UserServiceKey { .. } => f.write_str("UserServiceKey(***)"),
        }
    }
}

/// Exponential backoff applied to transient failures before any body is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Zero disables retries; the first transient failure reaches the caller.
    pub max_retries: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.min_backoff_ms))
    }
}

/// Immutable client configuration shared by every retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub credentials: Credentials,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Whole-request timeout, including the body. `None` means no limit,
    /// which suits long unbounded windows.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Longest time range fetched in a single request.
    #[serde(default = "default_max_window_secs")]
    pub max_window_secs: i64,
    /// Extra headers sent with every request, before authentication headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("logshare/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_window_secs() -> i64 {
    DEFAULT_MAX_WINDOW_SECS
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            retry: RetryConfig::default(),
            max_window_secs: default_max_window_secs(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_max_window_secs(mut self, secs: i64) -> Self {
        self.max_window_secs = secs;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Checks the config and returns the parsed base URL, normalised to end
    /// with `/` so relative paths join beneath it.
    pub fn validate(&self) -> Result<Url> {
        if !self.credentials.is_complete() {
            return Err(LogshareError::EmptyCredentials);
        }
        if self.max_window_secs <= 0 {
            return Err(LogshareError::Config(format!(
                "max_window_secs must be positive, got {}",
                self.max_window_secs
            )));
        }
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)?;
        if url.cannot_be_a_base() {
            return Err(LogshareError::Config(format!("base URL {} cannot be a base", self.base_url)));
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Loads a `.env` file if one exists, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    ///
    /// Credentials are taken in order of preference: API token, then key and
    /// email, then user-service key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let credentials = if let Some(token) = get(ENV_API_TOKEN) {
            Credentials::token(token)
        } else if let (Some(key), Some(email)) = (get(ENV_API_KEY), get(ENV_API_EMAIL)) {
            Credentials::key_email(key, email)
        } else if let Some(key) = get(ENV_USER_SERVICE_KEY) {
            Credentials::user_service_key(key)
        } else {
            return Err(LogshareError::EmptyCredentials);
        };

        let mut config = ClientConfig::new(credentials);
        if let Some(base_url) = get(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(v) = get(ENV_TIMEOUT_SECS) {
            config.timeout_secs = Some(parse_var(ENV_TIMEOUT_SECS, &v)?);
        }
        if let Some(v) = get(ENV_MAX_RETRIES) {
            config.retry.max_retries = parse_var(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = get(ENV_MAX_WINDOW_SECS) {
            config.max_window_secs = parse_var(ENV_MAX_WINDOW_SECS, &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| LogshareError::Config(format!("{}={:?}: {}", name, value, e)))
}

impl fmt::Display for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientConfig
    Base URL: {},
    Credentials: {:?},
    User agent: {},
    Timeout: {:?},
    Connect timeout: {}s,
    Retries: {} ({}ms..{}ms),
    Max window: {}s,
    Extra headers: {:?}
",
            self.base_url,
            self.credentials,
            self.user_agent,
            self.timeout_secs,
            self.connect_timeout_secs,
            self.retry.max_retries,
            self.retry.min_backoff_ms,
            self.retry.max_backoff_ms,
            self.max_window_secs,
            self.headers.keys().collect::<Vec<_>>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn token_takes_precedence() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("CF_API_TOKEN", "tok"),
            ("CF_API_KEY", "key"),
            ("CF_API_EMAIL", "me@example.com"),
        ]))
        .unwrap();
        assert_eq!(cfg.credentials, Credentials::token("tok"));
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.max_window_secs, DEFAULT_MAX_WINDOW_SECS);
    }

    #[test]
    fn key_email_and_overrides() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("CF_API_KEY", "key"),
            ("CF_API_EMAIL", "me@example.com"),
            ("CF_API_BASE_URL", "http://127.0.0.1:9000/v4"),
            ("LOGSHARE_TIMEOUT_SECS", "30"),
            ("LOGSHARE_MAX_RETRIES", "0"),
            ("LOGSHARE_MAX_WINDOW_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(cfg.credentials, Credentials::key_email("key", "me@example.com"));
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.max_window_secs, 600);
        assert_eq!(cfg.validate().unwrap().as_str(), "http://127.0.0.1:9000/v4/");
    }

    #[test]
    fn missing_or_partial_credentials() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(LogshareError::EmptyCredentials)
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("CF_API_KEY", "key")])),
            Err(LogshareError::EmptyCredentials)
        ));
        assert!(matches!(
            ClientConfig::new(Credentials::token("")).validate(),
            Err(LogshareError::EmptyCredentials)
        ));
    }

    #[test]
    fn rejects_bad_numbers_and_windows() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("CF_API_TOKEN", "t"), ("LOGSHARE_MAX_RETRIES", "many")])),
            Err(LogshareError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::new(Credentials::token("t")).with_max_window_secs(0).validate(),
            Err(LogshareError::Config(_))
        ));
    }

    #[test]
    fn credential_headers() {
        assert_eq!(
            Credentials::token("abc").headers(),
            vec![("authorization", "Bearer abc".to_string())]
        );
        assert_eq!(
            Credentials::key_email("k", "e@x.io").headers(),
            vec![("x-auth-key", "k".to_string()), ("x-auth-email", "e@x.io".to_string())]
        );
        assert_eq!(
            Credentials::user_service_key("v1.0-abc").headers(),
            vec![("x-auth-user-service-key", "v1.0-abc".to_string())]
        );
    }

    #[test]
    fn display_masks_secrets() {
        let cfg = ClientConfig::new(Credentials::key_email("supersecret", "ops@example.com"))
            .with_header("x-trace", "1");
        let shown = cfg.to_string();
        assert!(!shown.contains("supersecret"));
        assert!(shown.contains("ops@example.com"));
        assert!(shown.contains("x-trace"));
    }

    #[test]
    fn deserializes_from_json() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{"credentials":{"type":"token","token":"t"},"retry":{"max_retries":1},"max_window_secs":900}"#,
        )
        .unwrap();
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.min_backoff_ms, 500);
        assert_eq!(cfg.max_window_secs, 900);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert!(cfg.validate().is_ok());
    }
}

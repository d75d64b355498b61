//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Whole-request bound for non-streaming calls.
    pub request_secs: u64,
    pub connect_secs: u64,
    /// Longest gap tolerated between two chat stream chunks.
    pub stream_idle_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            stream_idle_secs: DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root without trailing slash, e.g. `https://host/api`.
    pub base_url: String,
    /// Raw `Cookie` header value forwarded on every request.
    pub session_cookie: Option<String>,
    pub timeouts: ClientTimeouts,
}

impl ClientConfig {
    /// Config for `base_url` with default timeouts and no session.
    ///
    /// # Errors
    ///
    /// Returns an error unless the URL is `http://` or `https://`.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self { base_url: normalize_base_url(base_url)?, session_cookie: None, timeouts: ClientTimeouts::default() })
    }

    #[must_use]
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        let cookie = cookie.into();
        self.session_cookie = (!cookie.trim().is_empty()).then_some(cookie);
        self
    }

    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `CAMPUS_BASE_URL`: default `http://127.0.0.1:8080/api`
    /// - `CAMPUS_SESSION_COOKIE`: raw cookie header value
    /// - `CAMPUS_REQUEST_TIMEOUT_SECS`: default 60
    /// - `CAMPUS_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CAMPUS_STREAM_IDLE_TIMEOUT_SECS`: default 60
    ///
    /// # Errors
    ///
    /// Returns an error if `CAMPUS_BASE_URL` is not an http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an http(s) URL.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("CAMPUS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let mut config = Self::new(&base_url)?;
        if let Some(cookie) = lookup("CAMPUS_SESSION_COOKIE") {
            config = config.with_session_cookie(cookie);
        }
        let parse = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(default)
        };
        config.timeouts = ClientTimeouts {
            request_secs: parse("CAMPUS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse("CAMPUS_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            stream_idle_secs: parse("CAMPUS_STREAM_IDLE_TIMEOUT_SECS", DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        };
        Ok(config)
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .is_some_and(|rest| !rest.is_empty());
    if !has_host {
        return Err(ConfigError::InvalidBaseUrl(raw.to_owned()));
    }
    Ok(trimmed.to_owned())
}

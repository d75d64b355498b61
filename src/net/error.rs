//! Errors produced at the HTTP boundary.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures and non-success statuses are kept distinct so logs
//! stay precise, but callers treat both as terminal for the operation.
//! Payloads that fail schema parsing surface as `MalformedResponse`.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// Errors produced by campus API operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the body could not be read.
    #[error("http request failed: {0}")]
    Transport(String),

    /// The request or a stream read exceeded its time bound.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("server returned status {status}")]
    Status { status: u16, body: String },

    /// The response body did not match the endpoint schema.
    #[error("malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    /// The server accepted the request but reported `success: false`.
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// A configured header (session cookie) is not a valid header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    /// A URL could not be built from the configured base URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    pub(crate) fn malformed(endpoint: &str, detail: impl ToString) -> Self {
        Self::MalformedResponse { endpoint: endpoint.to_owned(), detail: detail.to_string() }
    }

    /// Stable machine-readable code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "E_TRANSPORT",
            Self::Timeout => "E_TIMEOUT",
            Self::Status { .. } => "E_STATUS",
            Self::MalformedResponse { .. } => "E_MALFORMED_RESPONSE",
            Self::Rejected(_) => "E_REJECTED",
            Self::InvalidHeader(_) => "E_INVALID_HEADER",
            Self::InvalidUrl(_) => "E_INVALID_URL",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    /// Whether a retry could plausibly succeed. Nothing retries
    /// automatically; this only feeds log fields.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Status { status: 429 | 500..=599, .. })
    }

    /// `true` for 401/403 answers.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        Self::Transport(error.to_string())
    }
}

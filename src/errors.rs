//! Typed error kinds for the fetch pipeline and LLM layer.
//!
//! Library code returns these; the CLI binary wraps them with `anyhow::Context`
//! at the boundary (see `main.rs`).

use std::collections::HashMap;

use thiserror::Error;

/// Errors raised by the fetcher, rate limiter, robots cache, and cookie jar.
#[derive(Debug, Error)]
pub enum WebFetchError {
    #[error("robots.txt disallows fetching {url}")]
    RobotsDisallowed { url: String },

    #[error("redirect from {url} is missing a Location header")]
    BadRedirect { url: String },

    #[error("too many redirects starting from {url}")]
    TooManyRedirects { url: String },

    #[error("HTTP {status} fetching {url}")]
    HttpError {
        url: String,
        status: u16,
        headers: HashMap<String, String>,
    },

    #[error("non-HTML content at {url} (content-type: {content_type})")]
    NonHtmlContent { url: String, content_type: String },

    #[error("timed out fetching {url}")]
    TimedOut { url: String },

    #[error("network error fetching {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

impl WebFetchError {
    /// Best-effort HTTP status for the rate limiter's retry/backoff decision.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            WebFetchError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after_header(&self) -> Option<&str> {
        match self {
            WebFetchError::HttpError { headers, .. } => headers
                .get("retry-after")
                .map(std::string::String::as_str),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            WebFetchError::RobotsDisallowed { url }
            | WebFetchError::BadRedirect { url }
            | WebFetchError::TooManyRedirects { url }
            | WebFetchError::HttpError { url, .. }
            | WebFetchError::NonHtmlContent { url, .. }
            | WebFetchError::TimedOut { url }
            | WebFetchError::NetworkError { url, .. } => Some(url),
            WebFetchError::InvalidUrl(_) | WebFetchError::Other(_) => None,
        }
    }
}

/// Errors raised by an `LLMProvider`.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM invocation failed (call_site={call_site}): {message}")]
    Invocation { call_site: String, message: String },

    #[error("LLM call timed out (call_site={call_site})")]
    Timeout { call_site: String },

    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
}

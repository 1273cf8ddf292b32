//! Error taxonomy for TogoWS requests.
//!
//! Input problems are raised before any network activity. Protocol errors are
//! body-content anomalies the service reports with a successful transport
//! response. Transport errors come from the HTTP layer itself. Nothing here
//! is retried automatically.

use std::time::Duration;

use thiserror::Error;

use crate::capabilities::CapabilityWarning;

pub type Result<T> = std::result::Result<T, TogoError>;

#[derive(Error, Debug)]
pub enum TogoError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("{0}")]
    Unsupported(CapabilityWarning),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to read response body: {0}")]
    Io(#[from] std::io::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl TogoError {
    pub(crate) fn input(msg: impl Into<String>) -> Self {
        TogoError::Input(msg.into())
    }

    /// The request URL this error is attached to, if known.
    pub fn url(&self) -> Option<&str> {
        match self {
            TogoError::Protocol(p) => Some(p.url()),
            TogoError::Transport(t) => t.url(),
            _ => None,
        }
    }
}

/// Failure signatures the service embeds in an otherwise successful response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("TogoWS replied with no data: {url}")]
    NoData { url: String },
    /// The service sometimes answers with one space instead of a record.
    #[error("TogoWS replied with just a single space: {url}")]
    EmptyPayload { url: String },
    #[error("TogoWS replied with an error message: {message} ({url})")]
    ServiceError { url: String, message: String },
    #[error("TogoWS replied: We're sorry, but something went wrong ({url})")]
    InternalError { url: String },
    #[error("search window returned {got} identifiers, expected {expected} ({url})")]
    WindowMismatch {
        url: String,
        expected: u64,
        got: u64,
    },
    #[error("search count was not an integer: {body:?} ({url})")]
    InvalidCount { url: String, body: String },
}

impl ProtocolError {
    pub fn url(&self) -> &str {
        match self {
            ProtocolError::NoData { url }
            | ProtocolError::EmptyPayload { url }
            | ProtocolError::ServiceError { url, .. }
            | ProtocolError::InternalError { url }
            | ProtocolError::WindowMismatch { url, .. }
            | ProtocolError::InvalidCount { url, .. } => url,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Rate limited (429) by {url}{}", retry_hint(.retry_after))]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },
}

impl TransportError {
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportError::Request(e) => e.url().map(|u| u.as_str()),
            TransportError::Status { url, .. } | TransportError::RateLimited { url, .. } => {
                Some(url)
            }
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl From<reqwest::Error> for TogoError {
    fn from(e: reqwest::Error) -> Self {
        TogoError::Transport(TransportError::Request(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_with_retry_after() {
        let err = TransportError::RateLimited {
            url: "http://x/entry".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(
            err.to_string(),
            "Rate limited (429) by http://x/entry, retry after 5.0s"
        );
    }

    #[test]
    fn protocol_error_exposes_url() {
        let err: TogoError = ProtocolError::NoData {
            url: "http://x/entry/pubmed/1".into(),
        }
        .into();
        assert_eq!(err.url(), Some("http://x/entry/pubmed/1"));
        assert!(err.to_string().contains("no data"));
    }

    #[test]
    fn input_error_has_no_url() {
        assert_eq!(TogoError::input("bad").url(), None);
    }
}

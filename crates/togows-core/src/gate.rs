//! Throttled dispatch and error-body sniffing.
//!
//! TogoWS reports most failures inside a normal-looking response body. After
//! each request the gate reads the first [`SNIFF_LINES`] lines, pushes them
//! back, and checks them for the known failure signatures before handing the
//! body to the caller.

use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, Result, TogoError, TransportError};
use crate::request::{Method, Request};
use crate::response::ResponseHandle;
use crate::throttle::{Throttle, check_rate_limit_response};

/// Number of leading lines inspected for error signatures.
pub const SNIFF_LINES: usize = 10;

const ERROR_PREFIX: &str = "Error: ";
const INTERNAL_ERROR_TITLE: &str = "<title>We're sorry, but something went wrong</title>";

/// Sends requests through the throttle and validates what comes back.
pub struct ResponseGate {
    http: reqwest::Client,
    throttle: Throttle,
}

impl ResponseGate {
    /// `http` carries the user agent and request timeout.
    pub fn new(http: reqwest::Client, throttle: Throttle) -> Self {
        Self { http, throttle }
    }

    /// Wait for a throttle slot, send `request`, and validate the body.
    ///
    /// Cancellation is honoured while waiting for the slot, while the
    /// request is in flight, and while the leading lines are read.
    pub async fn dispatch(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TogoError::Cancelled),
            _ = self.throttle.await_turn() => {}
        }

        tracing::debug!(method = ?request.method, url = %request.url, "dispatching");

        let builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url).form(&request.form),
        };
        let send = builder.send();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TogoError::Cancelled),
            resp = send => resp?,
        };

        check_rate_limit_response(&resp)?;
        let status = resp.status();
        let handle = ResponseHandle::from_response(resp);

        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TogoError::Cancelled),
            checked = validate(handle, &request.url) => checked?,
        };

        // A service error page may come with a failing status; the body
        // signature above is the more useful report, so status comes second.
        if !status.is_success() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        Ok(handle)
    }
}

/// Check the leading lines of `handle` for failure signatures.
///
/// On success the handle is returned with nothing consumed.
pub async fn validate(mut handle: ResponseHandle, url: &str) -> Result<ResponseHandle> {
    let head = handle.peek_lines(SNIFF_LINES).await?.concat();
    sniff(url, &head)?;
    Ok(handle)
}

/// Classify the leading text of a response body.
pub fn sniff(url: &str, head: &str) -> std::result::Result<(), ProtocolError> {
    if head.is_empty() {
        return Err(ProtocolError::NoData {
            url: url.to_string(),
        });
    }
    if head == " " {
        return Err(ProtocolError::EmptyPayload {
            url: url.to_string(),
        });
    }
    if head.starts_with(ERROR_PREFIX) {
        return Err(ProtocolError::ServiceError {
            url: url.to_string(),
            message: head.trim_end().to_string(),
        });
    }
    if head.contains(INTERNAL_ERROR_TITLE) {
        return Err(ProtocolError::InternalError {
            url: url.to_string(),
        });
    }
    Ok(())
}

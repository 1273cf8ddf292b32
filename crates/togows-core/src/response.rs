//! Line-oriented response reader with push-back.
//!
//! The body is consumed incrementally from the HTTP stream, so large entries
//! are never buffered whole unless the caller asks for it. Lines pushed back
//! with [`ResponseHandle::unread_line`] are returned again, most recent
//! first, before any new data is read.

use std::fmt;
use std::pin::Pin;

use futures_util::TryStreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::capabilities::CapabilityWarning;
use crate::error::Result;

type BodyReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// An open TogoWS response body.
///
/// Returned by the gate only after the leading lines passed the error checks;
/// those lines have been pushed back and read again from the start. Dropping
/// the handle closes the underlying connection.
pub struct ResponseHandle {
    url: String,
    status: u16,
    reader: BodyReader,
    /// Stack of pushed-back lines; the last element is read next.
    pushed_back: Vec<String>,
    warnings: Vec<CapabilityWarning>,
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("pushed_back", &self.pushed_back.len())
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl ResponseHandle {
    pub(crate) fn from_response(resp: reqwest::Response) -> Self {
        let url = resp.url().to_string();
        let status = resp.status().as_u16();
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Self::new(url, status, Box::pin(StreamReader::new(stream)))
    }

    /// Wrap an in-memory body, e.g. a cached or recorded response.
    pub fn from_text(url: impl Into<String>, body: impl Into<String>) -> Self {
        let cursor = std::io::Cursor::new(body.into().into_bytes());
        Self::new(url.into(), 200, Box::pin(cursor))
    }

    fn new(url: String, status: u16, reader: BodyReader) -> Self {
        Self {
            url,
            status,
            reader,
            pushed_back: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<CapabilityWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// The URL this response was fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP status of the response.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Capability warnings raised while the request was validated.
    pub fn warnings(&self) -> &[CapabilityWarning] {
        &self.warnings
    }

    /// Read the next line, including its trailing newline if present.
    ///
    /// Returns `None` at end of body. Invalid UTF-8 is replaced rather than
    /// failing the read.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pushed_back.pop() {
            return Ok(Some(line));
        }
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Push a line back so the next [`read_line`](Self::read_line) returns it.
    pub fn unread_line(&mut self, line: String) {
        self.pushed_back.push(line);
    }

    /// Read up to `max` lines and push them back, leaving the handle as it was.
    pub async fn peek_lines(&mut self, max: usize) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(max);
        while lines.len() < max {
            match self.read_line().await? {
                Some(line) => lines.push(line),
                None => break,
            }
        }
        for line in lines.iter().rev() {
            self.unread_line(line.clone());
        }
        Ok(lines)
    }

    /// Read everything that remains, pushed-back lines included.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(line) = self.pushed_back.pop() {
            out.push_str(&line);
        }
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).await?;
        out.push_str(&String::from_utf8_lossy(&rest));
        Ok(out)
    }

    /// Read the rest of the body as whitespace-separated tokens.
    pub async fn read_tokens(&mut self) -> Result<Vec<String>> {
        let body = self.read_to_string().await?;
        Ok(body.split_whitespace().map(String::from).collect())
    }

    /// Release the connection.
    pub fn close(self) {
        tracing::trace!(url = %self.url, "response closed");
    }
}

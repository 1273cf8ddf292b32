//! Client for the TogoWS REST proxy to biological databases.
//!
//! TogoWS fronts many providers (NCBI, EBI, DDBJ, KEGG, PDBj) behind three
//! uniform operations: entry fetch, keyword search and format conversion.
//! [`TogoClient`] wraps them with client-side rate limiting, lazily
//! discovered capability checks, and detection of the error messages the
//! service embeds in response bodies.

pub mod capabilities;
pub mod client;
pub mod config_file;
pub mod error;
pub mod gate;
pub mod pager;
pub mod request;
pub mod response;
pub mod throttle;

// Re-export for convenience
pub use capabilities::{
    Capability, CapabilityCache, CapabilityKind, CapabilitySet, CapabilityWarning, Validation,
};
pub use client::TogoClient;
pub use error::{ProtocolError, Result, TogoError, TransportError};
pub use pager::{DEFAULT_BATCH_SIZE, SearchPager};
pub use request::{DEFAULT_BASE_URL, Identifiers, Request, RequestBuilder, Window};
pub use response::ResponseHandle;
pub use throttle::{DEFAULT_MIN_INTERVAL, Throttle};
pub use tokio_util::sync::CancellationToken;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for a [`TogoClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service root, e.g. `http://togows.dbcls.jp`.
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum spacing between requests. Zero disables pacing.
    pub min_interval_ms: u64,
    /// Window size used by [`TogoClient::search_iter`] when none is given.
    pub search_batch_size: u64,
    /// Treat unlisted fields, formats and search databases as errors.
    pub strict_capabilities: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: concat!("togows-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            min_interval_ms: DEFAULT_MIN_INTERVAL.as_millis() as u64,
            search_batch_size: DEFAULT_BATCH_SIZE,
            strict_capabilities: false,
        }
    }
}

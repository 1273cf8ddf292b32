//! The public TogoWS operations.
//!
//! Each call builds its request first (so malformed input never reaches the
//! network), checks names against the discovered capability lists, then
//! dispatches through the gate.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::ClientConfig;
use crate::capabilities::{
    CapabilityCache, CapabilityKey, CapabilityKind, CapabilitySet, CapabilityWarning, Validation,
};
use crate::error::{ProtocolError, Result, TogoError};
use crate::gate::ResponseGate;
use crate::pager::{SearchPager, SearchSource, WindowPage};
use crate::request::{Identifiers, Request, RequestBuilder, Window};
use crate::response::ResponseHandle;
use crate::throttle::Throttle;

/// A TogoWS client: one throttle, one capability cache, one HTTP pool.
///
/// Share a single instance (e.g. behind `Arc`) to keep every request in the
/// process under the same rate budget.
pub struct TogoClient {
    config: ClientConfig,
    builder: RequestBuilder,
    gate: ResponseGate,
    capabilities: CapabilityCache,
}

impl std::fmt::Debug for TogoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TogoClient")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl TogoClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .build()?;
        let throttle = Throttle::new(Duration::from_millis(config.min_interval_ms));
        Ok(Self {
            builder: RequestBuilder::new(config.base_url.clone()),
            gate: ResponseGate::new(http, throttle),
            capabilities: CapabilityCache::new(),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn requests(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    // ── discovery ──────────────────────────────────────────────────────

    /// Databases served by the entry (`kind = Entry`) or search endpoint.
    pub async fn supported_databases(
        &self,
        kind: CapabilityKind,
        cancel: &CancellationToken,
    ) -> Result<CapabilitySet> {
        let request = match kind {
            CapabilityKind::Entry => self.builder.entry_databases(),
            CapabilityKind::Search => self.builder.search_databases(),
        };
        self.capabilities
            .get_or_discover(CapabilityKey::Databases(kind), || {
                self.discover(request, cancel)
            })
            .await
    }

    /// Fields the service lists for entry database `db`.
    pub async fn fields_for(&self, db: &str, cancel: &CancellationToken) -> Result<CapabilitySet> {
        let request = self.builder.entry_fields(db)?;
        self.capabilities
            .get_or_discover(CapabilityKey::Fields(db.trim().to_string()), || {
                self.discover(request, cancel)
            })
            .await
    }

    /// Formats the service lists for entry database `db`.
    pub async fn formats_for(&self, db: &str, cancel: &CancellationToken) -> Result<CapabilitySet> {
        let request = self.builder.entry_formats(db)?;
        self.capabilities
            .get_or_discover(CapabilityKey::Formats(db.trim().to_string()), || {
                self.discover(request, cancel)
            })
            .await
    }

    async fn discover(&self, request: Request, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut handle = self.gate.dispatch(&request, cancel).await?;
        let names = handle.read_tokens().await?;
        handle.close();
        Ok(names)
    }

    // ── fetch ──────────────────────────────────────────────────────────

    /// Fetch one or more entries from `db`.
    ///
    /// `ids` may be a comma-delimited string or a sequence of identifiers.
    /// An unlisted database fails before the request is sent; an unlisted
    /// field or format only produces a warning.
    pub async fn fetch(
        &self,
        db: &str,
        ids: impl Into<Identifiers>,
        field: Option<&str>,
        format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle> {
        let ids = ids.into();
        let request = self.builder.entry(db, &ids, field, format)?;
        let db = db.trim();
        let mut warnings = Vec::new();

        let databases = self.supported_databases(CapabilityKind::Entry, cancel).await?;
        self.admit(Validation::fetch_database(&databases, db), &mut warnings)?;

        if let Some(field) = field.map(str::trim).filter(|f| !f.is_empty()) {
            let fields = self.fields_for(db, cancel).await?;
            self.admit(Validation::fetch_field(&fields, db, field), &mut warnings)?;
        }
        if let Some(format) = format.map(str::trim).filter(|f| !f.is_empty()) {
            let formats = self.formats_for(db, cancel).await?;
            self.admit(Validation::fetch_format(&formats, db, format), &mut warnings)?;
        }

        let handle = self.gate.dispatch(&request, cancel).await?;
        Ok(handle.with_warnings(warnings))
    }

    // ── search ─────────────────────────────────────────────────────────

    /// Search `db`, optionally restricted to one result window.
    pub async fn search(
        &self,
        db: &str,
        query: &str,
        window: Option<Window>,
        format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle> {
        let request = self.builder.search(db, query, window, format)?;
        let warnings = self.check_search_database(db, cancel).await?;
        let handle = self.gate.dispatch(&request, cancel).await?;
        Ok(handle.with_warnings(warnings))
    }

    /// [`search`](Self::search) with a raw offset/count pair.
    ///
    /// Both or neither must be given, and both must be positive.
    pub async fn search_window(
        &self,
        db: &str,
        query: &str,
        offset: Option<i64>,
        count: Option<i64>,
        format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle> {
        let window = Window::from_parts(offset, count)?;
        self.search(db, query, window, format, cancel).await
    }

    /// Number of hits for `query` in `db`.
    pub async fn search_count(
        &self,
        db: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let request = self.builder.search_count(db, query)?;
        self.check_search_database(db, cancel).await?;
        let mut handle = self.gate.dispatch(&request, cancel).await?;
        let body = handle.read_to_string().await?;
        handle.close();
        body.trim()
            .parse::<u64>()
            .map_err(|_| {
                ProtocolError::InvalidCount {
                    url: request.url.clone(),
                    body: body.trim().to_string(),
                }
                .into()
            })
    }

    /// Walk every hit for `query` in `db`, `batch_size` ids per request.
    ///
    /// `None` uses the configured batch size.
    pub fn search_iter(
        &self,
        db: &str,
        query: &str,
        batch_size: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<SearchPager<'_>> {
        let batch_size = batch_size.unwrap_or(self.config.search_batch_size);
        SearchPager::new(self, db, query, batch_size, cancel)
    }

    async fn check_search_database(
        &self,
        db: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CapabilityWarning>> {
        let mut warnings = Vec::new();
        let databases = self
            .supported_databases(CapabilityKind::Search, cancel)
            .await?;
        self.admit(Validation::search_database(&databases, db.trim()), &mut warnings)?;
        Ok(warnings)
    }

    /// One pager window. The database was already checked by the count
    /// request that started the walk, so it is not checked again here.
    async fn search_page(
        &self,
        db: &str,
        query: &str,
        window: Window,
        cancel: &CancellationToken,
    ) -> Result<WindowPage> {
        let request = self.builder.search(db, query, Some(window), None)?;
        let mut handle = self.gate.dispatch(&request, cancel).await?;
        let url = handle.url().to_string();
        let ids = handle.read_tokens().await?;
        handle.close();
        Ok(WindowPage { url, ids })
    }

    // ── convert ────────────────────────────────────────────────────────

    /// Convert `data` from `in_format` to `out_format`.
    ///
    /// The record text is sent as the form field `data`; there is no
    /// discovery list for conversion formats, so nothing is pre-checked.
    pub async fn convert(
        &self,
        data: impl Into<String>,
        in_format: &str,
        out_format: &str,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle> {
        let request = self.builder.convert(data, in_format, out_format)?;
        self.gate.dispatch(&request, cancel).await
    }

    /// [`convert`](Self::convert) reading the records from `reader`.
    pub async fn convert_reader<R>(
        &self,
        mut reader: R,
        in_format: &str,
        out_format: &str,
        cancel: &CancellationToken,
    ) -> Result<ResponseHandle>
    where
        R: AsyncRead + Unpin,
    {
        let mut data = String::new();
        reader.read_to_string(&mut data).await?;
        self.convert(data, in_format, out_format, cancel).await
    }

    /// Apply a validation outcome: reject, or record (and log) a warning.
    fn admit(&self, validation: Validation, warnings: &mut Vec<CapabilityWarning>) -> Result<()> {
        match validation {
            Validation::Supported => Ok(()),
            Validation::Reject(w) => Err(TogoError::Unsupported(w)),
            Validation::Warn(w) if self.config.strict_capabilities => {
                Err(TogoError::Unsupported(w))
            }
            Validation::Warn(w) => {
                tracing::warn!("{}", w);
                warnings.push(w);
                Ok(())
            }
        }
    }
}

impl SearchSource for TogoClient {
    fn count<'a>(
        &'a self,
        db: &'a str,
        query: &'a str,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
        Box::pin(self.search_count(db, query, cancel))
    }

    fn window<'a>(
        &'a self,
        db: &'a str,
        query: &'a str,
        window: Window,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<WindowPage>> + Send + 'a>> {
        Box::pin(self.search_page(db, query, window, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> TogoClient {
        TogoClient::new(ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            min_interval_ms: 0,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn half_window_fails_before_network() {
        let client = offline_client();
        let cancel = CancellationToken::new();
        let err = client
            .search_window("uniprot", "q", Some(1), None, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TogoError::Input(_)));
        assert_eq!(client.capabilities().loaded_count(), 0);
    }

    #[tokio::test]
    async fn empty_ids_fail_before_network() {
        let client = offline_client();
        let err = client
            .fetch("pubmed", Vec::<String>::new(), None, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TogoError::Input(_)));
    }

    #[tokio::test]
    async fn convert_without_format_fails_before_network() {
        let client = offline_client();
        let err = client
            .convert("LOCUS", "genbank", "", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TogoError::Input(_)));
    }

    #[test]
    fn zero_batch_pager_is_rejected() {
        let client = offline_client();
        assert!(
            client
                .search_iter("uniprot", "q", Some(0), CancellationToken::new())
                .is_err()
        );
    }

    #[test]
    fn strict_mode_escalates_warnings() {
        let mut client = offline_client();
        client.config.strict_capabilities = true;
        let warning = CapabilityWarning {
            capability: crate::capabilities::Capability::Field,
            kind: CapabilityKind::Entry,
            name: "length".into(),
            database: Some("embl".into()),
        };
        let mut warnings = Vec::new();
        let err = client
            .admit(Validation::Warn(warning), &mut warnings)
            .unwrap_err();
        assert!(matches!(err, TogoError::Unsupported(_)));
        assert!(warnings.is_empty());
    }

    #[test]
    fn lenient_mode_collects_warnings() {
        let client = offline_client();
        let warning = CapabilityWarning {
            capability: crate::capabilities::Capability::Format,
            kind: CapabilityKind::Entry,
            name: "gff".into(),
            database: Some("pubmed".into()),
        };
        let mut warnings = Vec::new();
        client
            .admit(Validation::Warn(warning.clone()), &mut warnings)
            .unwrap();
        assert_eq!(warnings, vec![warning]);
    }
}

//! Lazily discovered service capabilities.
//!
//! TogoWS lists the databases it serves, and per entry database the fields
//! and formats it understands. Each list is fetched on first use and kept for
//! the lifetime of the cache. Nothing is invalidated: the lists are known to
//! be incomplete, so they drive warnings rather than act as a source of truth.
//!
//! Every key owns an async once-cell in a [`DashMap`], so concurrent first
//! lookups of the same key share a single discovery call. A failed discovery
//! leaves the cell empty and the next lookup tries again.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::Result;

/// A discovered capability list.
pub type CapabilitySet = Arc<BTreeSet<String>>;

/// Which database universe a list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// Databases served by `/entry`.
    Entry,
    /// Databases served by `/search`.
    Search,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Entry => write!(f, "entry fetch"),
            CapabilityKind::Search => write!(f, "search"),
        }
    }
}

/// Cache key: one discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapabilityKey {
    Databases(CapabilityKind),
    Fields(String),
    Formats(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Database,
    Field,
    Format,
}

/// A name missing from a discovery list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityWarning {
    pub capability: Capability,
    pub kind: CapabilityKind,
    pub name: String,
    /// The database the field or format was checked against.
    pub database: Option<String>,
}

impl fmt::Display for CapabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.capability {
            Capability::Database => "database",
            Capability::Field => "field",
            Capability::Format => "format",
        };
        write!(
            f,
            "TogoWS {} does not explicitly support {} '{}'",
            self.kind, what, self.name
        )?;
        if let Some(db) = &self.database {
            write!(f, " for database '{}'", db)?;
        }
        Ok(())
    }
}

/// Outcome of checking a name against a discovery list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Supported,
    /// Not listed, but the request should still be attempted.
    Warn(CapabilityWarning),
    /// Not listed, and the request must not be attempted.
    Reject(CapabilityWarning),
}

impl Validation {
    fn check(
        set: &BTreeSet<String>,
        name: &str,
        warning: impl FnOnce() -> CapabilityWarning,
        reject: bool,
    ) -> Self {
        if set.contains(name) {
            Validation::Supported
        } else if reject {
            Validation::Reject(warning())
        } else {
            Validation::Warn(warning())
        }
    }

    /// Entry databases are authoritative: an unlisted one is rejected.
    pub fn fetch_database(databases: &BTreeSet<String>, db: &str) -> Self {
        Self::check(
            databases,
            db,
            || CapabilityWarning {
                capability: Capability::Database,
                kind: CapabilityKind::Entry,
                name: db.to_string(),
                database: None,
            },
            true,
        )
    }

    /// Field lists omit fields the service accepts, so only warn.
    pub fn fetch_field(fields: &BTreeSet<String>, db: &str, field: &str) -> Self {
        Self::check(
            fields,
            field,
            || CapabilityWarning {
                capability: Capability::Field,
                kind: CapabilityKind::Entry,
                name: field.to_string(),
                database: Some(db.to_string()),
            },
            false,
        )
    }

    pub fn fetch_format(formats: &BTreeSet<String>, db: &str, format: &str) -> Self {
        Self::check(
            formats,
            format,
            || CapabilityWarning {
                capability: Capability::Format,
                kind: CapabilityKind::Entry,
                name: format.to_string(),
                database: Some(db.to_string()),
            },
            false,
        )
    }

    /// Search lists omit working aliases, so only warn.
    pub fn search_database(databases: &BTreeSet<String>, db: &str) -> Self {
        Self::check(
            databases,
            db,
            || CapabilityWarning {
                capability: Capability::Database,
                kind: CapabilityKind::Search,
                name: db.to_string(),
                database: None,
            },
            false,
        )
    }
}

/// Process-lifetime memo of discovery results.
#[derive(Default)]
pub struct CapabilityCache {
    entries: DashMap<CapabilityKey, Arc<OnceCell<CapabilitySet>>>,
}

impl fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the list for `key`, running `discover` only if it is not loaded.
    pub async fn get_or_discover<F, Fut>(&self, key: CapabilityKey, discover: F) -> Result<CapabilitySet>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let cell = self.entries.entry(key.clone()).or_default().clone();
        if let Some(set) = cell.get() {
            tracing::trace!(?key, "capability cache hit");
            return Ok(set.clone());
        }
        let set = cell
            .get_or_try_init(|| async {
                let names = discover().await?;
                let set: BTreeSet<String> = names.into_iter().collect();
                tracing::info!(?key, count = set.len(), "discovered capabilities");
                Ok::<_, crate::error::TogoError>(Arc::new(set))
            })
            .await?;
        Ok(set.clone())
    }

    /// The list for `key` if it has already been discovered.
    #[cfg(test)]
    fn cached(&self, key: &CapabilityKey) -> Option<CapabilitySet> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys with a discovered list.
    pub fn loaded_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TogoError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // ── Validation ─────────────────────────────────────────────────────

    #[test]
    fn fetch_database_rejects_unlisted() {
        let dbs = set(&["pubmed", "uniprot"]);
        assert_eq!(Validation::fetch_database(&dbs, "pubmed"), Validation::Supported);
        match Validation::fetch_database(&dbs, "nope") {
            Validation::Reject(w) => {
                assert_eq!(w.capability, Capability::Database);
                assert_eq!(w.kind, CapabilityKind::Entry);
            }
            other => panic!("expected Reject, got {other:?}"),
        }
    }

    #[test]
    fn fetch_field_and_format_only_warn() {
        let names = set(&["au", "title"]);
        assert!(matches!(
            Validation::fetch_field(&names, "pubmed", "length"),
            Validation::Warn(_)
        ));
        assert!(matches!(
            Validation::fetch_format(&names, "pubmed", "gff"),
            Validation::Warn(_)
        ));
        assert_eq!(
            Validation::fetch_field(&names, "pubmed", "au"),
            Validation::Supported
        );
    }

    #[test]
    fn search_database_only_warns() {
        let dbs = set(&["uniprot"]);
        match Validation::search_database(&dbs, "ncbi-gene") {
            Validation::Warn(w) => assert_eq!(w.kind, CapabilityKind::Search),
            other => panic!("expected Warn, got {other:?}"),
        }
    }

    #[test]
    fn warning_message_names_database() {
        let w = CapabilityWarning {
            capability: Capability::Field,
            kind: CapabilityKind::Entry,
            name: "length".into(),
            database: Some("embl".into()),
        };
        assert_eq!(
            w.to_string(),
            "TogoWS entry fetch does not explicitly support field 'length' for database 'embl'"
        );
    }

    // ── CapabilityCache ────────────────────────────────────────────────

    #[tokio::test]
    async fn discovers_once_per_key() {
        let cache = CapabilityCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let got = cache
                .get_or_discover(CapabilityKey::Fields("pubmed".into()), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["au".to_string(), "ti".to_string()])
                })
                .await
                .unwrap();
            assert!(got.contains("au"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_are_distinct_entries() {
        let cache = CapabilityCache::new();
        let calls = AtomicUsize::new(0);
        let keys = [
            CapabilityKey::Databases(CapabilityKind::Entry),
            CapabilityKey::Databases(CapabilityKind::Search),
            CapabilityKey::Fields("pubmed".into()),
            CapabilityKey::Formats("pubmed".into()),
            CapabilityKey::Fields("uniprot".into()),
        ];
        for _ in 0..3 {
            for key in &keys {
                cache
                    .get_or_discover(key.clone(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![])
                    })
                    .await
                    .unwrap();
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), keys.len());
        assert_eq!(cache.loaded_count(), keys.len());
    }

    #[tokio::test]
    async fn failed_discovery_is_not_cached() {
        let cache = CapabilityCache::new();
        let key = CapabilityKey::Databases(CapabilityKind::Entry);

        let err = cache
            .get_or_discover(key.clone(), || async { Err(TogoError::input("boom")) })
            .await;
        assert!(err.is_err());
        assert!(cache.cached(&key).is_none());

        let ok = cache
            .get_or_discover(key.clone(), || async { Ok(vec!["pubmed".to_string()]) })
            .await
            .unwrap();
        assert!(ok.contains("pubmed"));
        assert!(cache.cached(&key).is_some());
    }

    #[tokio::test]
    async fn concurrent_first_lookups_share_one_call() {
        let cache = Arc::new(CapabilityCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_discover(CapabilityKey::Formats("ddbj".into()), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(vec!["fasta".to_string()])
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().contains("fasta"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

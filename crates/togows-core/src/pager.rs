//! Batched walk over a complete search result set.
//!
//! The pager asks for the total hit count once, then requests one-based
//! windows of at most `batch_size` identifiers until the count is used up.
//! Only the current window is held in memory. A window that comes back with
//! a different number of identifiers than requested ends the walk with
//! [`ProtocolError::WindowMismatch`]; short results are never passed off as
//! complete ones.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, Result, TogoError};
use crate::request::Window;

pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Identifiers returned for one search window.
#[derive(Debug, Clone)]
pub struct WindowPage {
    pub url: String,
    pub ids: Vec<String>,
}

/// Where the pager gets its counts and windows from.
pub trait SearchSource: Send + Sync {
    /// Total number of hits for `query`.
    fn count<'a>(
        &'a self,
        db: &'a str,
        query: &'a str,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

    /// Identifiers in one window of the result set.
    fn window<'a>(
        &'a self,
        db: &'a str,
        query: &'a str,
        window: Window,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<WindowPage>> + Send + 'a>>;
}

struct Cursor {
    total: u64,
    /// One-based offset of the next window.
    offset: u64,
    remaining: u64,
    buffer: VecDeque<String>,
}

enum PagerState {
    /// Count not requested yet.
    Pending,
    Active(Cursor),
    /// `total` is `None` when the walk failed before the count arrived.
    Done { total: Option<u64> },
}

/// A finite, non-restartable sequence of search result identifiers.
pub struct SearchPager<'a> {
    source: &'a dyn SearchSource,
    db: String,
    query: String,
    batch_size: u64,
    cancel: CancellationToken,
    state: PagerState,
}

impl<'a> SearchPager<'a> {
    pub fn new(
        source: &'a dyn SearchSource,
        db: impl Into<String>,
        query: impl Into<String>,
        batch_size: u64,
        cancel: CancellationToken,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TogoError::input("batch size should be at least one"));
        }
        Ok(Self {
            source,
            db: db.into(),
            query: query.into(),
            batch_size,
            cancel,
            state: PagerState::Pending,
        })
    }

    /// Total hit count, once the first item has been requested.
    pub fn total(&self) -> Option<u64> {
        match &self.state {
            PagerState::Pending => None,
            PagerState::Active(cursor) => Some(cursor.total),
            PagerState::Done { total } => *total,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, PagerState::Done { .. })
    }

    fn finish(&mut self) {
        let total = self.total();
        self.state = PagerState::Done { total };
    }

    /// Next identifier, `None` once the result set is exhausted.
    ///
    /// After an error the pager is finished and keeps returning `None`.
    pub async fn next_id(&mut self) -> Option<Result<String>> {
        match self.advance().await {
            Ok(Some(id)) => Some(Ok(id)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<String>> {
        loop {
            let (offset, remaining) = match &mut self.state {
                PagerState::Done { .. } => return Ok(None),
                PagerState::Pending => {
                    let total = self
                        .source
                        .count(&self.db, &self.query, &self.cancel)
                        .await?;
                    tracing::debug!(db = %self.db, query = %self.query, total, "search count");
                    if total == 0 {
                        self.state = PagerState::Done { total: Some(0) };
                        return Ok(None);
                    }
                    self.state = PagerState::Active(Cursor {
                        total,
                        offset: 1,
                        remaining: total,
                        buffer: VecDeque::new(),
                    });
                    continue;
                }
                PagerState::Active(cursor) => {
                    if let Some(id) = cursor.buffer.pop_front() {
                        return Ok(Some(id));
                    }
                    if cursor.remaining == 0 {
                        return Ok(None);
                    }
                    (cursor.offset, cursor.remaining)
                }
            };

            if self.cancel.is_cancelled() {
                return Err(TogoError::Cancelled);
            }

            let size = self.batch_size.min(remaining);
            let window = Window::new(offset, size)?;
            tracing::debug!(db = %self.db, %window, "fetching search window");

            let page = self
                .source
                .window(&self.db, &self.query, window, &self.cancel)
                .await?;
            if page.ids.len() as u64 != size {
                return Err(ProtocolError::WindowMismatch {
                    url: page.url,
                    expected: size,
                    got: page.ids.len() as u64,
                }
                .into());
            }

            if let PagerState::Active(cursor) = &mut self.state {
                cursor.buffer.extend(page.ids);
                cursor.offset += size;
                cursor.remaining -= size;
            }
        }
    }

    /// Drain the pager into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        while let Some(id) = self.next_id().await {
            ids.push(id?);
        }
        Ok(ids)
    }

    /// Turn the pager into a [`Stream`] of identifiers.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + 'a {
        futures_util::stream::unfold(self, |mut pager| async move {
            pager.next_id().await.map(|item| (item, pager))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a synthetic result set of `total` ids (`ID1`, `ID2`, ...).
    struct MockSource {
        total: u64,
        count_calls: AtomicUsize,
        windows: Mutex<Vec<(u64, u64)>>,
        /// Window offset -> number of ids to return instead of the requested count.
        short: HashMap<u64, u64>,
    }

    impl MockSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                count_calls: AtomicUsize::new(0),
                windows: Mutex::new(Vec::new()),
                short: HashMap::new(),
            }
        }

        fn with_short_window(mut self, offset: u64, returned: u64) -> Self {
            self.short.insert(offset, returned);
            self
        }

        fn windows(&self) -> Vec<(u64, u64)> {
            self.windows.lock().unwrap().clone()
        }
    }

    impl SearchSource for MockSource {
        fn count<'a>(
            &'a self,
            _db: &'a str,
            _query: &'a str,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            let total = self.total;
            Box::pin(async move { Ok(total) })
        }

        fn window<'a>(
            &'a self,
            _db: &'a str,
            _query: &'a str,
            window: Window,
            _cancel: &'a CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<WindowPage>> + Send + 'a>> {
            self.windows
                .lock()
                .unwrap()
                .push((window.offset(), window.count()));
            let returned = self
                .short
                .get(&window.offset())
                .copied()
                .unwrap_or(window.count());
            let ids = (window.offset()..window.offset() + returned)
                .map(|i| format!("ID{i}"))
                .collect();
            Box::pin(async move {
                Ok(WindowPage {
                    url: format!("mock/{window}"),
                    ids,
                })
            })
        }
    }

    #[tokio::test]
    async fn zero_total_yields_nothing_and_requests_no_window() {
        let source = MockSource::new(0);
        let mut pager =
            SearchPager::new(&source, "uniprot", "q", 100, CancellationToken::new()).unwrap();
        assert!(pager.next_id().await.is_none());
        assert!(pager.is_done());
        assert!(source.windows().is_empty());
        assert_eq!(source.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn walks_windows_in_order() {
        let source = MockSource::new(250);
        let pager =
            SearchPager::new(&source, "uniprot", "q", 100, CancellationToken::new()).unwrap();
        let ids = pager.collect_all().await.unwrap();

        assert_eq!(source.windows(), vec![(1, 100), (101, 100), (201, 50)]);
        assert_eq!(ids.len(), 250);
        assert_eq!(ids.first().map(String::as_str), Some("ID1"));
        assert_eq!(ids.last().map(String::as_str), Some("ID250"));
        assert_eq!(source.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_size_changes_chunking_not_results() {
        let small = MockSource::new(37);
        let large = MockSource::new(37);
        let a = SearchPager::new(&small, "db", "q", 5, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        let b = SearchPager::new(&large, "db", "q", 100, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(small.windows().len(), 8);
        assert_eq!(large.windows(), vec![(1, 37)]);
    }

    #[tokio::test]
    async fn short_window_is_fatal() {
        let source = MockSource::new(250).with_short_window(101, 90);
        let mut pager =
            SearchPager::new(&source, "uniprot", "q", 100, CancellationToken::new()).unwrap();

        let mut yielded = 0;
        let err = loop {
            match pager.next_id().await {
                Some(Ok(_)) => yielded += 1,
                Some(Err(e)) => break e,
                None => panic!("pager ended without reporting the short window"),
            }
        };

        assert_eq!(yielded, 100);
        match err {
            TogoError::Protocol(ProtocolError::WindowMismatch { expected, got, .. }) => {
                assert_eq!((expected, got), (100, 90));
            }
            other => panic!("expected WindowMismatch, got {other:?}"),
        }
        assert!(pager.next_id().await.is_none());
        assert_eq!(source.windows(), vec![(1, 100), (101, 100)]);
    }

    #[tokio::test]
    async fn collect_all_surfaces_mismatch() {
        let source = MockSource::new(10).with_short_window(1, 11);
        let result = SearchPager::new(&source, "db", "q", 10, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await;
        assert!(matches!(
            result,
            Err(TogoError::Protocol(ProtocolError::WindowMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn stream_yields_same_sequence() {
        let source = MockSource::new(12);
        let pager = SearchPager::new(&source, "db", "q", 5, CancellationToken::new()).unwrap();
        let ids: Vec<String> = pager
            .into_stream()
            .map(|r| r.unwrap())
            .collect()
            .await;
        let expected: Vec<String> = (1..=12).map(|i| format!("ID{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn cancellation_stops_between_windows() {
        let source = MockSource::new(30);
        let cancel = CancellationToken::new();
        let mut pager = SearchPager::new(&source, "db", "q", 10, cancel.clone()).unwrap();

        for _ in 0..10 {
            assert!(pager.next_id().await.unwrap().is_ok());
        }
        cancel.cancel();
        assert!(matches!(
            pager.next_id().await,
            Some(Err(TogoError::Cancelled))
        ));
        assert_eq!(source.windows(), vec![(1, 10)]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let source = MockSource::new(1);
        assert!(matches!(
            SearchPager::new(&source, "db", "q", 0, CancellationToken::new()),
            Err(TogoError::Input(_))
        ));
    }

    #[tokio::test]
    async fn total_is_known_after_first_item() {
        let source = MockSource::new(3);
        let mut pager = SearchPager::new(&source, "db", "q", 2, CancellationToken::new()).unwrap();
        assert_eq!(pager.total(), None);
        pager.next_id().await;
        assert_eq!(pager.total(), Some(3));
    }

    #[tokio::test]
    async fn total_survives_the_end_of_the_walk() {
        let empty = MockSource::new(0);
        let mut pager = SearchPager::new(&empty, "db", "q", 2, CancellationToken::new()).unwrap();
        assert!(pager.next_id().await.is_none());
        assert!(pager.is_done());
        assert_eq!(pager.total(), Some(0));

        let source = MockSource::new(3);
        let mut pager = SearchPager::new(&source, "db", "q", 2, CancellationToken::new()).unwrap();
        while pager.next_id().await.is_some() {}
        assert!(pager.is_done());
        assert_eq!(pager.total(), Some(3));
    }

    #[tokio::test]
    async fn total_is_kept_after_a_window_error() {
        let source = MockSource::new(20).with_short_window(11, 3);
        let mut pager = SearchPager::new(&source, "db", "q", 10, CancellationToken::new()).unwrap();
        while let Some(Ok(_)) = pager.next_id().await {}
        assert!(pager.is_done());
        assert_eq!(pager.total(), Some(20));
    }
}

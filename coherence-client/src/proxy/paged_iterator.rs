//! Cursor-driven paged iteration over a whole cache.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use coherence_core::protocol::{IterationKind, PageCursor, RequestOp, Response, StreamItem};
use coherence_core::{CoherenceError, Result};

use crate::proxy::CacheCore;

type ItemFn<T> = Arc<dyn Fn(StreamItem) -> Result<T> + Send + Sync>;

struct PageState {
    buffer: VecDeque<StreamItem>,
    cursor: PageCursor,
}

struct PagedInner {
    core: Arc<CacheCore>,
    kind: IterationKind,
    page_size: u32,
    state: Mutex<PageState>,
}

/// An asynchronous, demand-driven iterator over a cache's keys, values or
/// entries, fetched one page per round trip.
///
/// Clones share one position: concurrent tasks calling [`next`] each
/// receive a disjoint subset of the elements, and together they see every
/// element exactly once. Exhaustion is sticky — once `Ok(None)` is
/// returned, every later call returns `Ok(None)` without a round trip.
///
/// The iterator is weakly consistent: entries mutated while iterating may
/// or may not be observed, but no element is delivered twice.
///
/// [`next`]: PagedIterator::next
pub struct PagedIterator<T> {
    inner: Arc<PagedInner>,
    map: ItemFn<T>,
}

impl<T> Clone for PagedIterator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            map: Arc::clone(&self.map),
        }
    }
}

impl<T> std::fmt::Debug for PagedIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedIterator")
            .field("cache", &self.inner.core.name())
            .field("kind", &self.inner.kind)
            .field("page_size", &self.inner.page_size)
            .finish()
    }
}

impl<T> PagedIterator<T> {
    pub(crate) fn new(
        core: Arc<CacheCore>,
        kind: IterationKind,
        page_size: u32,
        map: ItemFn<T>,
    ) -> Self {
        Self {
            inner: Arc::new(PagedInner {
                core,
                kind,
                page_size,
                state: Mutex::new(PageState {
                    buffer: VecDeque::new(),
                    cursor: PageCursor::new(),
                }),
            }),
            map,
        }
    }

    /// Returns the next element, or `Ok(None)` once the iteration is done.
    ///
    /// The shared position is held across the page fetch, so concurrent
    /// callers never request the same page twice.
    pub async fn next(&self) -> Result<Option<T>> {
        let mut state = self.inner.state.lock().await;
        loop {
            if let Some(item) = state.buffer.pop_front() {
                return (self.map)(item).map(Some);
            }
            if state.cursor.is_exhausted() {
                return Ok(None);
            }
            let response = self
                .inner
                .core
                .invoke(RequestOp::Page {
                    kind: self.inner.kind,
                    cookie: state.cursor.cookie().cloned(),
                    batch: self.inner.page_size,
                })
                .await?;
            match response {
                Response::Page { entries, cookie } => {
                    state.cursor.advance(cookie);
                    state.buffer.extend(entries);
                }
                other => {
                    return Err(CoherenceError::Protocol(format!(
                        "unexpected response to page fetch: {other:?}"
                    )));
                }
            }
        }
    }

    /// Drains the remaining elements into a vector.
    pub async fn collect(&self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

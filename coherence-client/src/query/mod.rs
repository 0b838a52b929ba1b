//! Server-side query and processor descriptors, and the lazy result stream.
//!
//! Filters and processors are opaque, pre-built descriptors: the client
//! submits them verbatim and the expression builder that produced them is
//! out of scope. Streamed results arrive as a [`QueryResults`] — a finite,
//! single-pass sequence.

use bytes::Bytes;
use tokio::sync::mpsc;

use coherence_core::protocol::StreamItem;
use coherence_core::Result;

/// An opaque server-side predicate descriptor.
///
/// The only contract with the descriptor is that it serializes into the
/// wire request; the grid evaluates it against entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    bytes: Bytes,
}

impl Filter {
    /// Wraps a pre-built filter descriptor.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

/// An opaque server-side entry processor descriptor.
///
/// Processors execute on the grid against one or more entries without
/// transferring the entries to the client; each entry is processed
/// atomically and independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    bytes: Bytes,
}

impl Processor {
    /// Wraps a pre-built processor descriptor.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

type ItemFn<T> = Box<dyn Fn(StreamItem) -> Result<T> + Send + Sync>;

/// A lazy, finite, single-pass sequence of streamed results.
///
/// A per-item fault (a decode failure, or a processor that threw for one
/// entry) arrives as an `Err` element and does not terminate the sequence;
/// only a transport-level fault does. The sequence is not restartable.
pub struct QueryResults<T> {
    rx: mpsc::Receiver<Result<StreamItem>>,
    map: ItemFn<T>,
}

impl<T> QueryResults<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<StreamItem>>, map: ItemFn<T>) -> Self {
        Self { rx, map }
    }

    /// Returns the next element, or `None` once the server has signalled
    /// completion.
    pub async fn next(&mut self) -> Option<Result<T>> {
        match self.rx.recv().await {
            None => None,
            Some(Ok(item)) => {
                if let Some(message) = item.error {
                    return Some(Err(coherence_core::CoherenceError::Remote(message)));
                }
                Some((self.map)(item))
            }
            Some(Err(err)) => Some(Err(err)),
        }
    }

    /// Drains the sequence, failing on the first `Err` element.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(item) = self.next().await {
            results.push(item?);
        }
        Ok(results)
    }
}

impl<T> std::fmt::Debug for QueryResults<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResults").finish()
    }
}

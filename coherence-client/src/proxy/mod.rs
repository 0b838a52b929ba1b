//! Cache proxy implementation.
//!
//! [`NamedCache`] is the typed, cheaply-cloneable handle applications use.
//! Each handle shares an untyped [`CacheCore`] registered in the session:
//! the core carries the handle's lifecycle state and its listener
//! registries, and every typed operation funnels through it.

mod named_cache;
mod paged_iterator;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use coherence_core::protocol::{EntryPush, RequestOp, Response, StreamItem};
use coherence_core::{CoherenceError, Result};

use crate::listener::MapLifecycleEvent;
use crate::session::SessionInner;

pub use named_cache::NamedCache;
pub use paged_iterator::PagedIterator;

const STATE_ACTIVE: u8 = 0;
const STATE_RELEASED: u8 = 1;
const STATE_DESTROYED: u8 = 2;

/// How an entry-listener registration is scoped for client-side matching.
pub(crate) enum DispatchScope {
    /// Every entry event on the cache.
    All,
    /// Events whose decoded key equals the registered key.
    Key(Box<dyn Fn(&Bytes) -> bool + Send + Sync>),
    /// Events the server matched against this registration's filter.
    Filter,
}

pub(crate) struct EntryDispatch {
    pub id: Uuid,
    pub scope: DispatchScope,
    pub deliver: Box<dyn Fn(&EntryPush) + Send + Sync>,
}

pub(crate) struct LifecycleDispatch {
    pub id: Uuid,
    pub deliver: Box<dyn Fn(&MapLifecycleEvent) + Send + Sync>,
}

/// Untyped per-cache state shared by every typed handle for one name.
///
/// The listener registries hold `Arc`ed dispatch entries so delivery can
/// run on a snapshot, outside the registry lock. A listener body is then
/// free to add or remove registrations without deadlocking.
pub(crate) struct CacheCore {
    name: String,
    session: Weak<SessionInner>,
    state: AtomicU8,
    entry_listeners: Mutex<Vec<Arc<EntryDispatch>>>,
    lifecycle_listeners: Mutex<Vec<Arc<LifecycleDispatch>>>,
}

impl CacheCore {
    pub(crate) fn new(name: &str, session: Weak<SessionInner>) -> Self {
        Self {
            name: name.to_string(),
            session,
            state: AtomicU8::new(STATE_ACTIVE),
            entry_listeners: Mutex::new(Vec::new()),
            lifecycle_listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn session(&self) -> Result<std::sync::Arc<SessionInner>> {
        self.session
            .upgrade()
            .ok_or(CoherenceError::SessionClosed)
    }

    /// Fails with the terminal kind once the handle is poisoned.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_ACTIVE => Ok(()),
            STATE_RELEASED => Err(CoherenceError::CacheReleased(self.name.clone())),
            _ => Err(CoherenceError::CacheDestroyed(self.name.clone())),
        }
    }

    pub(crate) async fn invoke(&self, op: RequestOp) -> Result<Response> {
        self.ensure_usable()?;
        self.session()?.invoke(&self.name, op).await
    }

    pub(crate) async fn invoke_stream(
        &self,
        op: RequestOp,
    ) -> Result<mpsc::Receiver<Result<StreamItem>>> {
        self.ensure_usable()?;
        self.session()?.invoke_stream(&self.name, op).await
    }

    /// Marks the handle destroyed. Returns `true` for the transition that
    /// actually poisoned it, so destroy is dispatched exactly once even
    /// when the local call races the server push.
    pub(crate) fn poison_destroyed(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_DESTROYED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Marks the handle released. Returns `true` on the first transition.
    pub(crate) fn mark_released(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_RELEASED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn add_entry_dispatch(&self, dispatch: EntryDispatch) {
        self.entry_listeners
            .lock()
            .expect("entry listener lock poisoned")
            .push(Arc::new(dispatch));
    }

    /// Removes one registration. Returns `false` when it was not present,
    /// which callers treat as a no-op.
    pub(crate) fn remove_entry_dispatch(&self, id: Uuid) -> bool {
        let mut listeners = self
            .entry_listeners
            .lock()
            .expect("entry listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    pub(crate) fn add_lifecycle_dispatch(&self, dispatch: LifecycleDispatch) {
        self.lifecycle_listeners
            .lock()
            .expect("lifecycle listener lock poisoned")
            .push(Arc::new(dispatch));
    }

    pub(crate) fn remove_lifecycle_dispatch(&self, id: Uuid) -> bool {
        let mut listeners = self
            .lifecycle_listeners
            .lock()
            .expect("lifecycle listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Drops every entry registration, returning the ids so the caller can
    /// deregister them on the server.
    pub(crate) fn take_entry_listener_ids(&self) -> Vec<Uuid> {
        let mut listeners = self
            .entry_listeners
            .lock()
            .expect("entry listener lock poisoned");
        listeners.drain(..).map(|entry| entry.id).collect()
    }

    pub(crate) fn clear_lifecycle_listeners(&self) {
        self.lifecycle_listeners
            .lock()
            .expect("lifecycle listener lock poisoned")
            .clear();
    }

    /// Delivers one entry push to every matching registration, in order.
    /// A panicking listener is isolated and logged; delivery continues.
    pub(crate) fn dispatch_entry_push(&self, push: &EntryPush) {
        let snapshot: Vec<Arc<EntryDispatch>> = self
            .entry_listeners
            .lock()
            .expect("entry listener lock poisoned")
            .clone();
        for entry in snapshot.iter() {
            let matched = match &entry.scope {
                DispatchScope::All => true,
                DispatchScope::Key(matcher) => matcher(&push.key),
                DispatchScope::Filter => push.filter_matches.contains(&entry.id),
            };
            if !matched {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (entry.deliver)(push))).is_err() {
                tracing::warn!(
                    cache = %self.name,
                    registration = %entry.id,
                    "map listener panicked during dispatch"
                );
            }
        }
    }

    /// Delivers one lifecycle event to every registration, isolating
    /// per-listener failures.
    pub(crate) fn dispatch_lifecycle(&self, event: &MapLifecycleEvent) {
        let snapshot: Vec<Arc<LifecycleDispatch>> = self
            .lifecycle_listeners
            .lock()
            .expect("lifecycle listener lock poisoned")
            .clone();
        for entry in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| (entry.deliver)(event))).is_err() {
                tracing::warn!(
                    cache = %self.name,
                    registration = %entry.id,
                    "lifecycle listener panicked during dispatch"
                );
            }
        }
    }
}

impl std::fmt::Debug for CacheCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCore")
            .field("name", &self.name)
            .field("state", &self.state.load(Ordering::SeqCst))
            .finish()
    }
}

//! Server-pushed event types and listener traits.
//!
//! Entry events ([`MapEvent`]) report a change to a single mapping;
//! lifecycle events ([`MapLifecycleEvent`]) report a whole-cache state
//! change. Event payloads stay in wire form until an accessor asks for
//! them, so a decode failure surfaces to the accessor's caller and never
//! disturbs the dispatch loop.

mod lifecycle;
mod map_listener;

use std::marker::PhantomData;

use bytes::Bytes;
use uuid::Uuid;

use coherence_core::protocol::{EntryEventKind, EntryPush};
use coherence_core::serialization::decode;
use coherence_core::Result;

pub use lifecycle::{
    dispatch_lifecycle_event, FnLifecycleListener, FnLifecycleListenerBuilder,
    MapLifecycleListener,
};
pub use map_listener::{dispatch_map_event, FnMapListener, FnMapListenerBuilder, MapListener};

/// Re-exported kind of a per-entry event.
pub use coherence_core::protocol::EntryEventKind as MapEventKind;

/// A handle identifying one listener registration on a cache.
///
/// Registrations are independent: removing one never affects the others on
/// the same cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRegistration {
    id: Uuid,
}

impl ListenerRegistration {
    pub(crate) fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// The unique id of this registration.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// A change to a single mapping, delivered to [`MapListener`]s.
pub struct MapEvent<K, V> {
    cache: String,
    kind: EntryEventKind,
    key: Bytes,
    old: Option<Bytes>,
    new: Option<Bytes>,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MapEvent<K, V> {
    pub(crate) fn from_push(push: &EntryPush) -> Self {
        Self {
            cache: push.cache.clone(),
            kind: push.kind,
            key: push.key.clone(),
            old: push.old.clone(),
            new: push.new.clone(),
            _phantom: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        cache: &str,
        kind: EntryEventKind,
        key: Bytes,
        old: Option<Bytes>,
        new: Option<Bytes>,
    ) -> Self {
        Self {
            cache: cache.to_string(),
            kind,
            key,
            old,
            new,
            _phantom: PhantomData,
        }
    }

    /// The name of the cache the event originated from.
    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// What happened to the entry.
    pub fn kind(&self) -> EntryEventKind {
        self.kind
    }
}

impl<K, V> MapEvent<K, V>
where
    K: serde::de::DeserializeOwned,
    V: serde::de::DeserializeOwned,
{
    /// Decodes and returns the affected key.
    pub fn key(&self) -> Result<K> {
        decode(&self.key)
    }

    /// Decodes and returns the previous value: present for updates and
    /// deletes, absent for inserts.
    pub fn old_value(&self) -> Result<Option<V>> {
        self.old.as_deref().map(decode).transpose()
    }

    /// Decodes and returns the new value: present for inserts and updates,
    /// absent for deletes.
    pub fn new_value(&self) -> Result<Option<V>> {
        self.new.as_deref().map(decode).transpose()
    }
}

impl<K, V> Clone for MapEvent<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            kind: self.kind,
            key: self.key.clone(),
            old: self.old.clone(),
            new: self.new.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<K, V> std::fmt::Debug for MapEvent<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapEvent")
            .field("cache", &self.cache)
            .field("kind", &self.kind)
            .field("has_old", &self.old.is_some())
            .field("has_new", &self.new.is_some())
            .finish()
    }
}

/// The kind of a whole-cache lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLifecycleKind {
    /// All entries were removed at once.
    Truncated,
    /// The cache was removed from the grid; the handle is terminal.
    Destroyed,
    /// The local handle was released; the remote cache still exists.
    Released,
    /// The session channel was lost outside a clean close.
    Disconnected,
}

/// A whole-cache state change, delivered to [`MapLifecycleListener`]s.
#[derive(Debug, Clone)]
pub struct MapLifecycleEvent {
    cache: String,
    kind: MapLifecycleKind,
}

impl MapLifecycleEvent {
    pub(crate) fn new(cache: impl Into<String>, kind: MapLifecycleKind) -> Self {
        Self {
            cache: cache.into(),
            kind,
        }
    }

    /// The name of the cache the event refers to.
    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// What happened to the cache.
    pub fn kind(&self) -> MapLifecycleKind {
        self.kind
    }
}

//! The typed cache handle.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use coherence_core::protocol::{
    EntryPush, IterationKind, ListenerScope, RequestOp, Response, StreamItem,
};
use coherence_core::serialization::{decode, encode};
use coherence_core::{CoherenceError, Result};

use crate::listener::{
    dispatch_map_event, ListenerRegistration, MapEvent, MapLifecycleEvent, MapLifecycleKind,
    MapLifecycleListener, MapListener,
};
use crate::proxy::{CacheCore, DispatchScope, EntryDispatch, LifecycleDispatch, PagedIterator};
use crate::query::{Filter, Processor, QueryResults};

/// Page size used by the iterator methods unless the caller picks one.
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 256;

/// A typed handle onto one remote cache.
///
/// Handles are cheap to clone; clones share the same registered state, so a
/// destroy observed through one clone poisons them all. Keys and values are
/// serialized per call and the grid holds only the wire form, which is why
/// mutating a value after `put` never changes the stored entry.
pub struct NamedCache<K, V> {
    core: Arc<CacheCore>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for NamedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _types: PhantomData,
        }
    }
}

impl<K, V> std::fmt::Debug for NamedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.core.name())
            .finish()
    }
}

impl<K, V> NamedCache<K, V>
where
    K: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn from_core(core: Arc<CacheCore>) -> Self {
        Self {
            core,
            _types: PhantomData,
        }
    }

    /// The cache name this handle is bound to.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Returns the value mapped to `key`, or `None`.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let response = self.core.invoke(RequestOp::Get { key: encode(key)? }).await?;
        decode_optional(expect_value(response)?)
    }

    /// Returns the value mapped to `key`, or the type's default when the
    /// mapping is absent.
    pub async fn get_or_default(&self, key: &K) -> Result<V>
    where
        V: Default,
    {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// Returns the present mappings for `keys`. Absent keys are simply not
    /// in the result; the order is unspecified.
    pub async fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>> {
        let encoded = keys.iter().map(encode).collect::<Result<Vec<_>>>()?;
        let mut rx = self
            .core
            .invoke_stream(RequestOp::GetAll { keys: encoded })
            .await?;
        let mut entries = Vec::new();
        while let Some(item) = rx.recv().await {
            let item = item?;
            if let Some(message) = item.error {
                return Err(CoherenceError::Remote(message));
            }
            entries.push(decode_entry::<K, V>(item)?);
        }
        Ok(entries)
    }

    /// Maps `key` to `value`, returning the previous value if any.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.put_with_expiry(key, value, Duration::ZERO).await
    }

    /// Maps `key` to `value` with a per-entry expiry. `Duration::ZERO`
    /// means the cache-level default expiry applies.
    pub async fn put_with_expiry(&self, key: &K, value: &V, ttl: Duration) -> Result<Option<V>> {
        let response = self
            .core
            .invoke(RequestOp::Put {
                key: encode(key)?,
                value: encode(value)?,
                ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            })
            .await?;
        decode_optional(expect_value(response)?)
    }

    /// Maps `key` to `value` only when no mapping exists. Returns the
    /// existing value when one was already present.
    pub async fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        let response = self
            .core
            .invoke(RequestOp::PutIfAbsent {
                key: encode(key)?,
                value: encode(value)?,
            })
            .await?;
        decode_optional(expect_value(response)?)
    }

    /// Stores every mapping in one round trip. The batch is applied
    /// atomically: either all entries land or none do.
    pub async fn put_all(&self, entries: &[(K, V)]) -> Result<()> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((encode(key)?, encode(value)?));
        }
        let response = self
            .core
            .invoke(RequestOp::PutAll { entries: encoded })
            .await?;
        expect_ok(response)
    }

    /// Replaces the value mapped to `key` only when a mapping exists.
    /// Returns the previous value, or `None` when nothing was replaced.
    pub async fn replace(&self, key: &K, value: &V) -> Result<Option<V>> {
        let response = self
            .core
            .invoke(RequestOp::Replace {
                key: encode(key)?,
                value: encode(value)?,
            })
            .await?;
        decode_optional(expect_value(response)?)
    }

    /// Replaces the mapping only when the current value equals `expected`.
    pub async fn replace_mapping(&self, key: &K, expected: &V, value: &V) -> Result<bool> {
        let response = self
            .core
            .invoke(RequestOp::ReplaceMapping {
                key: encode(key)?,
                expected: encode(expected)?,
                value: encode(value)?,
            })
            .await?;
        expect_bool(response)
    }

    /// Removes the mapping for `key`, returning its value if any.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        let response = self
            .core
            .invoke(RequestOp::Remove { key: encode(key)? })
            .await?;
        decode_optional(expect_value(response)?)
    }

    /// Removes the mapping only when the current value equals `value`.
    pub async fn remove_mapping(&self, key: &K, value: &V) -> Result<bool> {
        let response = self
            .core
            .invoke(RequestOp::RemoveMapping {
                key: encode(key)?,
                value: encode(value)?,
            })
            .await?;
        expect_bool(response)
    }

    /// Whether a mapping exists for `key`.
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        let response = self
            .core
            .invoke(RequestOp::ContainsKey { key: encode(key)? })
            .await?;
        expect_bool(response)
    }

    /// Whether any mapping holds `value`.
    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        let response = self
            .core
            .invoke(RequestOp::ContainsValue {
                value: encode(value)?,
            })
            .await?;
        expect_bool(response)
    }

    /// Whether `key` maps exactly to `value`.
    pub async fn contains_entry(&self, key: &K, value: &V) -> Result<bool> {
        let response = self
            .core
            .invoke(RequestOp::ContainsEntry {
                key: encode(key)?,
                value: encode(value)?,
            })
            .await?;
        expect_bool(response)
    }

    /// The number of mappings in the cache.
    pub async fn size(&self) -> Result<usize> {
        let count = expect_int(self.core.invoke(RequestOp::Size).await?)?;
        usize::try_from(count)
            .map_err(|_| CoherenceError::Protocol(format!("invalid cache size: {count}")))
    }

    /// Whether the cache holds no mappings.
    pub async fn is_empty(&self) -> Result<bool> {
        expect_bool(self.core.invoke(RequestOp::IsEmpty).await?)
    }

    /// Removes every mapping. Like [`truncate`](Self::truncate) this fires
    /// no per-entry events; the two differ only in the lifecycle event
    /// truncate raises.
    pub async fn clear(&self) -> Result<()> {
        expect_ok(self.core.invoke(RequestOp::Clear).await?)
    }

    /// Removes every mapping without per-entry events; observers see a
    /// single truncate lifecycle event instead. The handle stays usable.
    pub async fn truncate(&self) -> Result<()> {
        expect_ok(self.core.invoke(RequestOp::Truncate).await?)
    }

    /// Destroys the cache grid-wide. Every handle for this name becomes
    /// terminal; further operations fail.
    pub async fn destroy(&self) -> Result<()> {
        let response = self.core.invoke(RequestOp::Destroy).await?;
        expect_ok(response)?;
        if self.core.poison_destroyed() {
            if let Ok(session) = self.core.session() {
                session.deregister(self.core.name()).await;
            }
            self.core.take_entry_listener_ids();
            self.core.dispatch_lifecycle(&MapLifecycleEvent::new(
                self.core.name(),
                MapLifecycleKind::Destroyed,
            ));
            self.core.clear_lifecycle_listeners();
        }
        Ok(())
    }

    /// Releases the local handle. The remote cache and its data survive;
    /// this handle (and its clones) become terminal. Idempotent.
    pub async fn release(&self) -> Result<()> {
        if !self.core.mark_released() {
            return Ok(());
        }
        let ids = self.core.take_entry_listener_ids();
        if let Ok(session) = self.core.session() {
            for id in ids {
                let op = RequestOp::RemoveListener { registration: id };
                if let Err(err) = session.invoke(self.core.name(), op).await {
                    tracing::debug!(
                        cache = %self.core.name(),
                        error = %err,
                        "listener deregistration failed during release"
                    );
                }
            }
            session.deregister(self.core.name()).await;
        }
        self.core.dispatch_lifecycle(&MapLifecycleEvent::new(
            self.core.name(),
            MapLifecycleKind::Released,
        ));
        self.core.clear_lifecycle_listeners();
        Ok(())
    }

    /// Streams the keys whose entries match `filter`.
    pub async fn key_set(&self, filter: &Filter) -> Result<QueryResults<K>> {
        let rx = self
            .core
            .invoke_stream(RequestOp::Query {
                kind: IterationKind::Keys,
                filter: filter.to_bytes(),
            })
            .await?;
        Ok(QueryResults::new(rx, Box::new(decode_key_item::<K>)))
    }

    /// Streams the values of entries matching `filter`.
    pub async fn values(&self, filter: &Filter) -> Result<QueryResults<V>> {
        let rx = self
            .core
            .invoke_stream(RequestOp::Query {
                kind: IterationKind::Values,
                filter: filter.to_bytes(),
            })
            .await?;
        Ok(QueryResults::new(rx, Box::new(decode_value_item::<V>)))
    }

    /// Streams the entries matching `filter`.
    pub async fn entry_set(&self, filter: &Filter) -> Result<QueryResults<(K, V)>> {
        let rx = self
            .core
            .invoke_stream(RequestOp::Query {
                kind: IterationKind::Entries,
                filter: filter.to_bytes(),
            })
            .await?;
        Ok(QueryResults::new(rx, Box::new(decode_entry::<K, V>)))
    }

    /// Runs `processor` against the entry for `key` on the grid and
    /// returns its result, decoded as `R`.
    pub async fn invoke<R>(&self, key: &K, processor: &Processor) -> Result<Option<R>>
    where
        R: DeserializeOwned,
    {
        let response = self
            .core
            .invoke(RequestOp::Invoke {
                key: encode(key)?,
                processor: processor.to_bytes(),
            })
            .await?;
        decode_optional(expect_value(response)?)
    }

    /// Runs `processor` against each of `keys`, streaming per-key results.
    /// Each entry is processed atomically and independently; one entry's
    /// failure arrives as an `Err` element without ending the stream.
    pub async fn invoke_all_keys<R>(
        &self,
        keys: &[K],
        processor: &Processor,
    ) -> Result<QueryResults<(K, R)>>
    where
        R: DeserializeOwned + 'static,
    {
        let encoded = keys.iter().map(encode).collect::<Result<Vec<_>>>()?;
        let rx = self
            .core
            .invoke_stream(RequestOp::InvokeAllKeys {
                keys: encoded,
                processor: processor.to_bytes(),
            })
            .await?;
        Ok(QueryResults::new(rx, Box::new(decode_entry::<K, R>)))
    }

    /// Runs `processor` against every entry matching `filter`, streaming
    /// per-key results.
    pub async fn invoke_all<R>(
        &self,
        filter: &Filter,
        processor: &Processor,
    ) -> Result<QueryResults<(K, R)>>
    where
        R: DeserializeOwned + 'static,
    {
        let rx = self
            .core
            .invoke_stream(RequestOp::InvokeAllFilter {
                filter: filter.to_bytes(),
                processor: processor.to_bytes(),
            })
            .await?;
        Ok(QueryResults::new(rx, Box::new(decode_entry::<K, R>)))
    }

    /// A paged iterator over every key.
    pub fn key_set_iter(&self) -> PagedIterator<K> {
        self.key_set_iter_paged(DEFAULT_PAGE_SIZE)
    }

    /// A paged key iterator with an explicit page-size hint.
    pub fn key_set_iter_paged(&self, page_size: u32) -> PagedIterator<K> {
        PagedIterator::new(
            Arc::clone(&self.core),
            IterationKind::Keys,
            page_size.max(1),
            Arc::new(decode_key_item::<K>),
        )
    }

    /// A paged iterator over every value.
    pub fn values_iter(&self) -> PagedIterator<V> {
        self.values_iter_paged(DEFAULT_PAGE_SIZE)
    }

    /// A paged value iterator with an explicit page-size hint.
    pub fn values_iter_paged(&self, page_size: u32) -> PagedIterator<V> {
        PagedIterator::new(
            Arc::clone(&self.core),
            IterationKind::Values,
            page_size.max(1),
            Arc::new(decode_value_item::<V>),
        )
    }

    /// A paged iterator over every entry.
    pub fn entry_set_iter(&self) -> PagedIterator<(K, V)> {
        self.entry_set_iter_paged(DEFAULT_PAGE_SIZE)
    }

    /// A paged entry iterator with an explicit page-size hint.
    pub fn entry_set_iter_paged(&self, page_size: u32) -> PagedIterator<(K, V)> {
        PagedIterator::new(
            Arc::clone(&self.core),
            IterationKind::Entries,
            page_size.max(1),
            Arc::new(decode_entry::<K, V>),
        )
    }

    /// Registers `listener` for every entry event on the cache.
    pub async fn add_listener<L>(&self, listener: L) -> Result<ListenerRegistration>
    where
        L: MapListener<K, V> + 'static,
    {
        self.register_entry_listener(Arc::new(listener), DispatchScope::All, ListenerScope::All)
            .await
    }

    /// Registers `listener` for events on a single key.
    pub async fn add_key_listener<L>(&self, key: &K, listener: L) -> Result<ListenerRegistration>
    where
        L: MapListener<K, V> + 'static,
    {
        let wanted = encode(key)?;
        let subject = wanted.clone();
        let matcher: Box<dyn Fn(&Bytes) -> bool + Send + Sync> = Box::new(move |raw: &Bytes| {
            if *raw == subject {
                return true;
            }
            // Encodings of equal keys are not guaranteed byte-identical;
            // fall back to decoded equality.
            match (decode::<K>(raw), decode::<K>(&subject)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        });
        self.register_entry_listener(
            Arc::new(listener),
            DispatchScope::Key(matcher),
            ListenerScope::Key(wanted),
        )
        .await
    }

    /// Registers `listener` for events on entries matching `filter`. The
    /// grid evaluates the filter; only matching events reach the listener.
    pub async fn add_filter_listener<L>(
        &self,
        filter: &Filter,
        listener: L,
    ) -> Result<ListenerRegistration>
    where
        L: MapListener<K, V> + 'static,
    {
        self.register_entry_listener(
            Arc::new(listener),
            DispatchScope::Filter,
            ListenerScope::Filter(filter.to_bytes()),
        )
        .await
    }

    async fn register_entry_listener(
        &self,
        listener: Arc<dyn MapListener<K, V>>,
        scope: DispatchScope,
        wire_scope: ListenerScope,
    ) -> Result<ListenerRegistration> {
        self.core.ensure_usable()?;
        let registration = ListenerRegistration::new();
        let deliver: Box<dyn Fn(&EntryPush) + Send + Sync> = Box::new(move |push| {
            let event = MapEvent::from_push(push);
            dispatch_map_event(listener.as_ref(), &event);
        });
        // Local dispatch goes in before the server registration so no event
        // arriving between the two is dropped.
        self.core.add_entry_dispatch(EntryDispatch {
            id: registration.id(),
            scope,
            deliver,
        });
        let result = self
            .core
            .invoke(RequestOp::AddListener {
                registration: registration.id(),
                scope: wire_scope,
            })
            .await
            .and_then(expect_ok);
        if let Err(err) = result {
            self.core.remove_entry_dispatch(registration.id());
            return Err(err);
        }
        Ok(registration)
    }

    /// Removes an entry-listener registration. Removing one that is no
    /// longer present is a no-op.
    pub async fn remove_listener(&self, registration: &ListenerRegistration) -> Result<()> {
        if !self.core.remove_entry_dispatch(registration.id()) {
            return Ok(());
        }
        let response = self
            .core
            .invoke(RequestOp::RemoveListener {
                registration: registration.id(),
            })
            .await?;
        expect_ok(response)
    }

    /// Registers a lifecycle listener on this handle. Purely local; no
    /// round trip is involved.
    pub fn add_lifecycle_listener<L>(&self, listener: L) -> ListenerRegistration
    where
        L: MapLifecycleListener + 'static,
    {
        let registration = ListenerRegistration::new();
        let subject: Arc<dyn MapLifecycleListener> = Arc::new(listener);
        self.core.add_lifecycle_dispatch(LifecycleDispatch {
            id: registration.id(),
            deliver: Box::new(move |event| {
                crate::listener::dispatch_lifecycle_event(subject.as_ref(), event);
            }),
        });
        registration
    }

    /// Removes a lifecycle-listener registration. No-op when absent.
    pub fn remove_lifecycle_listener(&self, registration: &ListenerRegistration) {
        self.core.remove_lifecycle_dispatch(registration.id());
    }
}

fn unexpected(response: &Response) -> CoherenceError {
    CoherenceError::Protocol(format!("unexpected response variant: {response:?}"))
}

fn expect_ok(response: Response) -> Result<()> {
    match response {
        Response::Ok => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn expect_value(response: Response) -> Result<Option<Bytes>> {
    match response {
        Response::Value(value) => Ok(value),
        other => Err(unexpected(&other)),
    }
}

fn expect_bool(response: Response) -> Result<bool> {
    match response {
        Response::Bool(flag) => Ok(flag),
        other => Err(unexpected(&other)),
    }
}

fn expect_int(response: Response) -> Result<i64> {
    match response {
        Response::Int(value) => Ok(value),
        other => Err(unexpected(&other)),
    }
}

fn decode_optional<T: DeserializeOwned>(bytes: Option<Bytes>) -> Result<Option<T>> {
    bytes.as_deref().map(decode).transpose()
}

pub(crate) fn decode_key_item<K: DeserializeOwned>(item: StreamItem) -> Result<K> {
    let bytes = item
        .key
        .ok_or_else(|| CoherenceError::Protocol("stream item missing key".to_string()))?;
    decode(&bytes)
}

pub(crate) fn decode_value_item<V: DeserializeOwned>(item: StreamItem) -> Result<V> {
    let bytes = item
        .value
        .ok_or_else(|| CoherenceError::Protocol("stream item missing value".to_string()))?;
    decode(&bytes)
}

pub(crate) fn decode_entry<K: DeserializeOwned, V: DeserializeOwned>(
    item: StreamItem,
) -> Result<(K, V)> {
    let key = item
        .key
        .as_deref()
        .ok_or_else(|| CoherenceError::Protocol("stream item missing key".to_string()))
        .and_then(decode)?;
    let value = item
        .value
        .as_deref()
        .ok_or_else(|| CoherenceError::Protocol("stream item missing value".to_string()))
        .and_then(decode)?;
    Ok((key, value))
}

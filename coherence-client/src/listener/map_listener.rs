//! Entry listener trait for named caches.

use coherence_core::protocol::EntryEventKind;

use crate::listener::MapEvent;

/// A listener for per-entry events on a cache.
///
/// The kind-scoped methods receive only their event kind; `on_any` receives
/// every event regardless of kind. All methods default to no-ops.
///
/// # Example
///
/// ```ignore
/// struct AuditListener;
///
/// impl MapListener<i64, Person> for AuditListener {
///     fn on_inserted(&self, event: &MapEvent<i64, Person>) {
///         println!("inserted key {:?}", event.key());
///     }
/// }
/// ```
pub trait MapListener<K, V>: Send + Sync {
    /// Called when a new mapping is created.
    fn on_inserted(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }

    /// Called when an existing mapping's value changes.
    fn on_updated(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }

    /// Called when a mapping is removed.
    fn on_deleted(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }

    /// Called for every event, before the kind-scoped method.
    fn on_any(&self, event: &MapEvent<K, V>) {
        let _ = event;
    }
}

/// Dispatches one event to a listener: `on_any` first, then the kind-scoped
/// method.
pub fn dispatch_map_event<K, V>(listener: &dyn MapListener<K, V>, event: &MapEvent<K, V>) {
    listener.on_any(event);
    match event.kind() {
        EntryEventKind::Inserted => listener.on_inserted(event),
        EntryEventKind::Updated => listener.on_updated(event),
        EntryEventKind::Deleted => listener.on_deleted(event),
    }
}

type EventFn<K, V> = Box<dyn Fn(&MapEvent<K, V>) + Send + Sync>;

/// A [`MapListener`] built from closures.
///
/// Use [`FnMapListener::builder`] to construct one.
pub struct FnMapListener<K, V> {
    on_inserted: Option<EventFn<K, V>>,
    on_updated: Option<EventFn<K, V>>,
    on_deleted: Option<EventFn<K, V>>,
    on_any: Option<EventFn<K, V>>,
}

impl<K, V> FnMapListener<K, V> {
    /// Creates a new builder.
    pub fn builder() -> FnMapListenerBuilder<K, V> {
        FnMapListenerBuilder::new()
    }
}

impl<K, V> MapListener<K, V> for FnMapListener<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn on_inserted(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_inserted {
            f(event);
        }
    }

    fn on_updated(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_updated {
            f(event);
        }
    }

    fn on_deleted(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_deleted {
            f(event);
        }
    }

    fn on_any(&self, event: &MapEvent<K, V>) {
        if let Some(ref f) = self.on_any {
            f(event);
        }
    }
}

impl<K, V> std::fmt::Debug for FnMapListener<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMapListener")
            .field("on_inserted", &self.on_inserted.is_some())
            .field("on_updated", &self.on_updated.is_some())
            .field("on_deleted", &self.on_deleted.is_some())
            .field("on_any", &self.on_any.is_some())
            .finish()
    }
}

/// Builder for [`FnMapListener`].
pub struct FnMapListenerBuilder<K, V> {
    on_inserted: Option<EventFn<K, V>>,
    on_updated: Option<EventFn<K, V>>,
    on_deleted: Option<EventFn<K, V>>,
    on_any: Option<EventFn<K, V>>,
}

impl<K, V> FnMapListenerBuilder<K, V> {
    fn new() -> Self {
        Self {
            on_inserted: None,
            on_updated: None,
            on_deleted: None,
            on_any: None,
        }
    }

    /// Sets the handler for insert events.
    pub fn on_inserted<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_inserted = Some(Box::new(f));
        self
    }

    /// Sets the handler for update events.
    pub fn on_updated<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_updated = Some(Box::new(f));
        self
    }

    /// Sets the handler for delete events.
    pub fn on_deleted<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_deleted = Some(Box::new(f));
        self
    }

    /// Sets the handler called for every event kind.
    pub fn on_any<F>(mut self, f: F) -> Self
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        self.on_any = Some(Box::new(f));
        self
    }

    /// Builds the listener.
    pub fn build(self) -> FnMapListener<K, V> {
        FnMapListener {
            on_inserted: self.on_inserted,
            on_updated: self.on_updated,
            on_deleted: self.on_deleted,
            on_any: self.on_any,
        }
    }
}

impl<K, V> Default for FnMapListenerBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

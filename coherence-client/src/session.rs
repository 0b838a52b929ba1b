//! Session lifecycle and the typed cache registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};

use coherence_core::protocol::{
    LifecycleKind, LifecyclePush, Request, RequestOp, Response, ServerPush, StreamItem,
};
use coherence_core::{CoherenceError, Result};

use crate::config::SessionConfig;
use crate::listener::{MapLifecycleEvent, MapLifecycleKind};
use crate::proxy::{CacheCore, NamedCache};
use crate::transport::{TcpTransport, Transport};

const STATE_CREATED: u8 = 0;
const STATE_CONNECTED: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// The observable lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but not yet connected.
    Created,
    /// Connected and serving requests.
    Connected,
    /// A close is in progress.
    Closing,
    /// Closed; every operation fails.
    Closed,
}

struct RegisteredCache {
    types: TypeId,
    type_names: String,
    core: Arc<CacheCore>,
}

/// State shared between the session handle, its cache cores and the event
/// router task. Cores hold it weakly, so dropping the last [`Session`]
/// clone tears everything down.
pub(crate) struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    registry: Mutex<HashMap<String, RegisteredCache>>,
    /// Per-name creation gates. Concurrent first lookups for one name
    /// serialize on the name's gate, not on the registry lock, so a slow
    /// ensure for one cache never stalls lookups for others.
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionInner {
    fn ensure_connected(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTED => Ok(()),
            STATE_CREATED => Err(CoherenceError::Connection(
                "session is not connected".to_string(),
            )),
            _ => Err(CoherenceError::SessionClosed),
        }
    }

    /// Sends one unary request, mapping a server-reported fault to
    /// [`CoherenceError::Remote`].
    pub(crate) async fn invoke(&self, cache: &str, op: RequestOp) -> Result<Response> {
        self.ensure_connected()?;
        let request = Request {
            cache: cache.to_string(),
            scope: self.config.scope().to_string(),
            op,
        };
        let response = self
            .transport
            .invoke(request, self.config.request_timeout())
            .await?;
        match response {
            Response::Error { message } => Err(CoherenceError::Remote(message)),
            other => Ok(other),
        }
    }

    pub(crate) async fn invoke_stream(
        &self,
        cache: &str,
        op: RequestOp,
    ) -> Result<mpsc::Receiver<Result<StreamItem>>> {
        self.ensure_connected()?;
        let request = Request {
            cache: cache.to_string(),
            scope: self.config.scope().to_string(),
            op,
        };
        self.transport.invoke_stream(request).await
    }

    /// Drops a cache from the registry. A later `get_cache` for the same
    /// name builds a fresh handle.
    pub(crate) async fn deregister(&self, name: &str) {
        self.registry.lock().await.remove(name);
    }

    async fn lookup_core(&self, name: &str) -> Option<Arc<CacheCore>> {
        self.registry
            .lock()
            .await
            .get(name)
            .map(|registered| Arc::clone(&registered.core))
    }

    async fn route_push(&self, push: ServerPush) {
        match push {
            ServerPush::Entry(entry) => {
                if entry.scope != self.config.scope() {
                    return;
                }
                if let Some(core) = self.lookup_core(&entry.cache).await {
                    core.dispatch_entry_push(&entry);
                }
            }
            ServerPush::Lifecycle(lifecycle) => {
                if lifecycle.scope != self.config.scope() {
                    return;
                }
                self.route_lifecycle(lifecycle).await;
            }
        }
    }

    async fn route_lifecycle(&self, push: LifecyclePush) {
        match push.kind {
            LifecycleKind::Truncated => {
                if let Some(core) = self.lookup_core(&push.cache).await {
                    core.dispatch_lifecycle(&MapLifecycleEvent::new(
                        &push.cache,
                        MapLifecycleKind::Truncated,
                    ));
                }
            }
            LifecycleKind::Destroyed => {
                // A destroy initiated through this session already removed
                // the core; this path covers destroys by other clients. The
                // CAS keeps the event from firing twice when both race.
                let core = self.registry.lock().await.remove(&push.cache);
                if let Some(registered) = core {
                    if registered.core.poison_destroyed() {
                        registered.core.take_entry_listener_ids();
                        registered.core.dispatch_lifecycle(&MapLifecycleEvent::new(
                            &push.cache,
                            MapLifecycleKind::Destroyed,
                        ));
                        registered.core.clear_lifecycle_listeners();
                    }
                }
            }
        }
    }

    /// Informs every registered cache that the channel is gone. Fires only
    /// for losses outside a clean close.
    async fn handle_disconnect(&self) {
        if self.state.load(Ordering::SeqCst) != STATE_CONNECTED {
            return;
        }
        tracing::warn!(address = %self.config.address(), "session channel lost");
        let cores: Vec<Arc<CacheCore>> = self
            .registry
            .lock()
            .await
            .values()
            .map(|registered| Arc::clone(&registered.core))
            .collect();
        for core in cores {
            core.dispatch_lifecycle(&MapLifecycleEvent::new(
                core.name(),
                MapLifecycleKind::Disconnected,
            ));
        }
    }
}

async fn run_event_router(session: Weak<SessionInner>, mut rx: broadcast::Receiver<ServerPush>) {
    loop {
        match rx.recv().await {
            Ok(push) => {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                inner.route_push(push).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event router lagged; server pushes were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                if let Some(inner) = session.upgrade() {
                    inner.handle_disconnect().await;
                }
                break;
            }
        }
    }
}

/// A connection to the grid and the root object of the API.
///
/// Cheap to clone; clones share one connection and one cache registry.
/// Obtain typed cache handles with [`Session::get_cache`] and shut the
/// whole session down with [`Session::close`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connects to the endpoint named in `config` over TCP.
    pub async fn connect(config: SessionConfig) -> Result<Session> {
        let transport = TcpTransport::connect(&config).await?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Builds a session over an already-established transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Session {
        let inner = Arc::new(SessionInner {
            config,
            transport,
            state: AtomicU8::new(STATE_CREATED),
            registry: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
        });
        let rx = inner.transport.subscribe();
        tokio::spawn(run_event_router(Arc::downgrade(&inner), rx));
        inner.state.store(STATE_CONNECTED, Ordering::SeqCst);
        tracing::info!(
            address = %inner.config.address(),
            scope = %inner.config.scope(),
            "session connected"
        );
        Session { inner }
    }

    /// The configuration this session was built from.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_CREATED => SessionState::Created,
            STATE_CONNECTED => SessionState::Connected,
            STATE_CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Returns the typed handle for the named cache, creating the cache on
    /// the grid when it does not yet exist.
    ///
    /// The registry is keyed by name: concurrent calls for one name
    /// converge on a single handle, and a second call with different type
    /// parameters fails with
    /// [`CoherenceError::TypeMismatch`] rather than silently corrupting
    /// entries.
    pub async fn get_cache<K, V>(&self, name: &str) -> Result<NamedCache<K, V>>
    where
        K: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.inner.ensure_connected()?;
        if name.is_empty() {
            return Err(CoherenceError::Configuration(
                "cache name must not be empty".to_string(),
            ));
        }

        if let Some(handle) = self.lookup_typed::<K, V>(name).await? {
            return Ok(handle);
        }

        // First lookup for this name: serialize on a per-name gate so
        // concurrent callers share one remote ensure, while the registry
        // lock itself is only ever held for map access.
        let gate = {
            let mut creating = self.inner.creating.lock().await;
            Arc::clone(creating.entry(name.to_string()).or_default())
        };
        let _guard = gate.lock().await;

        // A racing caller may have finished the creation while we waited.
        if let Some(handle) = self.lookup_typed::<K, V>(name).await? {
            return Ok(handle);
        }

        let ensured = self.inner.invoke(name, RequestOp::Ensure).await;
        if let Err(err) = ensured {
            self.inner.creating.lock().await.remove(name);
            return Err(err);
        }

        let core = Arc::new(CacheCore::new(name, Arc::downgrade(&self.inner)));
        self.inner.registry.lock().await.insert(
            name.to_string(),
            RegisteredCache {
                types: TypeId::of::<(K, V)>(),
                type_names: type_pair_name::<K, V>(),
                core: Arc::clone(&core),
            },
        );
        self.inner.creating.lock().await.remove(name);
        Ok(NamedCache::from_core(core))
    }

    /// Looks up an existing handle under `name`, checking the requested
    /// type pair against the registered one.
    async fn lookup_typed<K, V>(&self, name: &str) -> Result<Option<NamedCache<K, V>>>
    where
        K: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let registry = self.inner.registry.lock().await;
        let Some(existing) = registry.get(name) else {
            return Ok(None);
        };
        if existing.types == TypeId::of::<(K, V)>() {
            return Ok(Some(NamedCache::from_core(Arc::clone(&existing.core))));
        }
        Err(CoherenceError::TypeMismatch {
            name: name.to_string(),
            expected: existing.type_names.clone(),
            actual: type_pair_name::<K, V>(),
        })
    }

    /// Closes the session: deregisters server-side listeners on a best
    /// effort basis, fails in-flight requests and poisons the handle.
    /// Idempotent; a second call returns `Ok` without doing work.
    pub async fn close(&self) -> Result<()> {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_CONNECTED,
                STATE_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Never connected, mid-close or already closed.
            let _ = self.inner.state.compare_exchange(
                STATE_CREATED,
                STATE_CLOSED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return Ok(());
        }

        let cores: Vec<Arc<CacheCore>> = {
            let mut registry = self.inner.registry.lock().await;
            registry
                .drain()
                .map(|(_, registered)| registered.core)
                .collect()
        };
        for core in cores {
            for id in core.take_entry_listener_ids() {
                let request = Request {
                    cache: core.name().to_string(),
                    scope: self.inner.config.scope().to_string(),
                    op: RequestOp::RemoveListener { registration: id },
                };
                let timeout = self.inner.config.request_timeout();
                if let Err(err) = self.inner.transport.invoke(request, timeout).await {
                    tracing::debug!(
                        cache = %core.name(),
                        error = %err,
                        "listener deregistration failed during close"
                    );
                }
            }
            core.clear_lifecycle_listeners();
        }

        let closed = self.inner.transport.close().await;
        self.inner.state.store(STATE_CLOSED, Ordering::SeqCst);
        tracing::info!(address = %self.inner.config.address(), "session closed");
        closed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.config.address())
            .field("scope", &self.inner.config.scope())
            .field("state", &self.state())
            .finish()
    }
}

fn type_pair_name<K: 'static, V: 'static>() -> String {
    format!(
        "<{}, {}>",
        std::any::type_name::<K>(),
        std::any::type_name::<V>()
    )
}

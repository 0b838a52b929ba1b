//! In-process grid double and shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use coherence_client::{Filter, Processor, Session, SessionConfig, Transport};
use coherence_core::protocol::{
    EntryEventKind, EntryPush, IterationKind, LifecycleKind, LifecyclePush, ListenerScope,
    Request, RequestOp, Response, ServerPush, StreamItem,
};
use coherence_core::{CoherenceError, Disposition, Result};

const PUSH_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<Vec<u8>, StoredEntry>,
    listeners: HashMap<Uuid, ListenerScope>,
}

impl CacheState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }
}

/// A single-process grid standing in for a remote cluster.
///
/// Implements the full operation set over plain maps, pushes entry and
/// lifecycle events, evaluates the test filter and processor formats, and
/// exposes a few failure knobs (batch rejection, added latency, severing
/// the push channel).
pub struct InMemoryGrid {
    state: Mutex<HashMap<String, CacheState>>,
    push_tx: Mutex<Option<broadcast::Sender<ServerPush>>>,
    latency: Mutex<Option<Duration>>,
    cache_latency: Mutex<HashMap<String, Duration>>,
    rejected_keys: Mutex<Vec<Bytes>>,
}

impl InMemoryGrid {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(PUSH_CAPACITY);
        Self {
            state: Mutex::new(HashMap::new()),
            push_tx: Mutex::new(Some(tx)),
            latency: Mutex::new(None),
            cache_latency: Mutex::new(HashMap::new()),
            rejected_keys: Mutex::new(Vec::new()),
        }
    }

    /// Adds a fixed delay before every unary response.
    pub fn set_latency(&self, delay: Duration) {
        *self.latency.lock().unwrap() = Some(delay);
    }

    /// Adds a fixed delay before unary responses for one cache only.
    pub fn set_cache_latency(&self, cache: &str, delay: Duration) {
        self.cache_latency
            .lock()
            .unwrap()
            .insert(cache.to_string(), delay);
    }

    /// Makes any bulk upsert containing this key fail as a whole.
    pub fn reject_key(&self, key: Bytes) {
        self.rejected_keys.lock().unwrap().push(key);
    }

    /// Drops the push channel, as seen on an unclean connection loss.
    pub fn sever(&self) {
        self.push_tx.lock().unwrap().take();
    }

    /// The number of live entries in a cache, bypassing the client.
    pub fn raw_size(&self, scope: &str, cache: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        match state.get_mut(&cache_key(scope, cache)) {
            Some(cache) => {
                cache.purge_expired();
                cache.entries.len()
            }
            None => 0,
        }
    }

    /// Whether a cache exists at all, bypassing the client.
    pub fn cache_exists(&self, scope: &str, cache: &str) -> bool {
        self.state.lock().unwrap().contains_key(&cache_key(scope, cache))
    }

    /// The number of registered server-side listeners on a cache.
    pub fn listener_count(&self, scope: &str, cache: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get(&cache_key(scope, cache))
            .map_or(0, |cache| cache.listeners.len())
    }

    fn emit(&self, push: ServerPush) {
        if let Some(tx) = self.push_tx.lock().unwrap().as_ref() {
            let _ = tx.send(push);
        }
    }

    fn emit_entry_event(
        &self,
        scope: &str,
        cache_name: &str,
        listeners: &HashMap<Uuid, ListenerScope>,
        kind: EntryEventKind,
        key: &[u8],
        old: Option<Bytes>,
        new: Option<Bytes>,
    ) {
        let subject = new.as_ref().or(old.as_ref());
        let filter_matches = listeners
            .iter()
            .filter_map(|(id, listener_scope)| match listener_scope {
                ListenerScope::Filter(filter) => {
                    let filter: Value = serde_json::from_slice(filter).ok()?;
                    let value = subject?;
                    filter_matches_value(&filter, value).then_some(*id)
                }
                _ => None,
            })
            .collect();
        self.emit(ServerPush::Entry(EntryPush {
            cache: cache_name.to_string(),
            scope: scope.to_string(),
            kind,
            key: Bytes::copy_from_slice(key),
            old,
            new,
            filter_matches,
        }));
    }

    fn apply(&self, request: Request) -> Response {
        let mut state = self.state.lock().unwrap();
        let full_key = cache_key(&request.scope, &request.cache);

        if matches!(request.op, RequestOp::Ensure) {
            state.entry(full_key).or_default();
            return Response::Ok;
        }

        let Some(cache) = state.get_mut(&full_key) else {
            return Response::Error {
                message: format!("no such cache: {}", request.cache),
            };
        };
        cache.purge_expired();

        match request.op {
            RequestOp::Ensure => unreachable!(),
            RequestOp::Get { key } => {
                Response::Value(cache.entries.get(key.as_ref()).map(|e| e.value.clone()))
            }
            RequestOp::Put {
                key,
                value,
                ttl_millis,
            } => {
                // A ttl too large to land on the clock never expires.
                let expires_at = (ttl_millis > 0)
                    .then(|| Instant::now().checked_add(Duration::from_millis(ttl_millis)))
                    .flatten();
                let old = cache.entries.insert(
                    key.to_vec(),
                    StoredEntry {
                        value: value.clone(),
                        expires_at,
                    },
                );
                let listeners = cache.listeners.clone();
                let kind = if old.is_some() {
                    EntryEventKind::Updated
                } else {
                    EntryEventKind::Inserted
                };
                let old_value = old.map(|e| e.value);
                self.emit_entry_event(
                    &request.scope,
                    &request.cache,
                    &listeners,
                    kind,
                    &key,
                    old_value.clone(),
                    Some(value),
                );
                Response::Value(old_value)
            }
            RequestOp::PutIfAbsent { key, value } => {
                if let Some(existing) = cache.entries.get(key.as_ref()) {
                    return Response::Value(Some(existing.value.clone()));
                }
                cache.entries.insert(
                    key.to_vec(),
                    StoredEntry {
                        value: value.clone(),
                        expires_at: None,
                    },
                );
                let listeners = cache.listeners.clone();
                self.emit_entry_event(
                    &request.scope,
                    &request.cache,
                    &listeners,
                    EntryEventKind::Inserted,
                    &key,
                    None,
                    Some(value),
                );
                Response::Value(None)
            }
            RequestOp::PutAll { entries } => {
                let rejected = self.rejected_keys.lock().unwrap();
                if entries.iter().any(|(key, _)| rejected.contains(key)) {
                    return Response::Error {
                        message: "batch rejected; no entries were applied".to_string(),
                    };
                }
                drop(rejected);
                let listeners = cache.listeners.clone();
                for (key, value) in entries {
                    let old = cache.entries.insert(
                        key.to_vec(),
                        StoredEntry {
                            value: value.clone(),
                            expires_at: None,
                        },
                    );
                    let kind = if old.is_some() {
                        EntryEventKind::Updated
                    } else {
                        EntryEventKind::Inserted
                    };
                    self.emit_entry_event(
                        &request.scope,
                        &request.cache,
                        &listeners,
                        kind,
                        &key,
                        old.map(|e| e.value),
                        Some(value),
                    );
                }
                Response::Ok
            }
            RequestOp::Replace { key, value } => {
                let Some(entry) = cache.entries.get_mut(key.as_ref()) else {
                    return Response::Value(None);
                };
                let old = std::mem::replace(&mut entry.value, value.clone());
                let listeners = cache.listeners.clone();
                self.emit_entry_event(
                    &request.scope,
                    &request.cache,
                    &listeners,
                    EntryEventKind::Updated,
                    &key,
                    Some(old.clone()),
                    Some(value),
                );
                Response::Value(Some(old))
            }
            RequestOp::ReplaceMapping {
                key,
                expected,
                value,
            } => {
                let Some(entry) = cache.entries.get_mut(key.as_ref()) else {
                    return Response::Bool(false);
                };
                if !json_eq(&entry.value, &expected) {
                    return Response::Bool(false);
                }
                let old = std::mem::replace(&mut entry.value, value.clone());
                let listeners = cache.listeners.clone();
                self.emit_entry_event(
                    &request.scope,
                    &request.cache,
                    &listeners,
                    EntryEventKind::Updated,
                    &key,
                    Some(old),
                    Some(value),
                );
                Response::Bool(true)
            }
            RequestOp::Remove { key } => {
                let old = cache.entries.remove(key.as_ref());
                let old_value = old.map(|e| e.value);
                if let Some(ref value) = old_value {
                    let listeners = cache.listeners.clone();
                    self.emit_entry_event(
                        &request.scope,
                        &request.cache,
                        &listeners,
                        EntryEventKind::Deleted,
                        &key,
                        Some(value.clone()),
                        None,
                    );
                }
                Response::Value(old_value)
            }
            RequestOp::RemoveMapping { key, value } => {
                let matches = cache
                    .entries
                    .get(key.as_ref())
                    .is_some_and(|entry| json_eq(&entry.value, &value));
                if !matches {
                    return Response::Bool(false);
                }
                let old = cache.entries.remove(key.as_ref());
                if let Some(entry) = old {
                    let listeners = cache.listeners.clone();
                    self.emit_entry_event(
                        &request.scope,
                        &request.cache,
                        &listeners,
                        EntryEventKind::Deleted,
                        &key,
                        Some(entry.value),
                        None,
                    );
                }
                Response::Bool(true)
            }
            RequestOp::ContainsKey { key } => {
                Response::Bool(cache.entries.contains_key(key.as_ref()))
            }
            RequestOp::ContainsValue { value } => Response::Bool(
                cache
                    .entries
                    .values()
                    .any(|entry| json_eq(&entry.value, &value)),
            ),
            RequestOp::ContainsEntry { key, value } => Response::Bool(
                cache
                    .entries
                    .get(key.as_ref())
                    .is_some_and(|entry| json_eq(&entry.value, &value)),
            ),
            RequestOp::Size => Response::Int(cache.entries.len() as i64),
            RequestOp::IsEmpty => Response::Bool(cache.entries.is_empty()),
            RequestOp::Clear => {
                // A bulk wipe; no per-entry events.
                cache.entries.clear();
                Response::Ok
            }
            RequestOp::Truncate => {
                cache.entries.clear();
                self.emit(ServerPush::Lifecycle(LifecyclePush {
                    cache: request.cache.clone(),
                    scope: request.scope.clone(),
                    kind: LifecycleKind::Truncated,
                }));
                Response::Ok
            }
            RequestOp::Destroy => {
                state.remove(&full_key);
                self.emit(ServerPush::Lifecycle(LifecyclePush {
                    cache: request.cache.clone(),
                    scope: request.scope.clone(),
                    kind: LifecycleKind::Destroyed,
                }));
                Response::Ok
            }
            RequestOp::Page {
                kind,
                cookie,
                batch,
            } => {
                let start = cookie
                    .as_deref()
                    .and_then(|raw| serde_json::from_slice::<usize>(raw).ok())
                    .unwrap_or(0);
                let keys: Vec<Vec<u8>> = cache.entries.keys().cloned().collect();
                let end = keys.len().min(start + batch as usize);
                let entries = keys[start.min(keys.len())..end]
                    .iter()
                    .map(|key| {
                        let value = cache.entries[key].value.clone();
                        stream_item(kind, key, value)
                    })
                    .collect();
                let cookie = (end < keys.len())
                    .then(|| Bytes::from(serde_json::to_vec(&end).unwrap()));
                Response::Page { entries, cookie }
            }
            RequestOp::Invoke { key, processor } => {
                match run_processor(cache, key.as_ref(), &processor) {
                    Ok(result) => Response::Value(Some(result)),
                    Err(message) => Response::Error { message },
                }
            }
            RequestOp::AddListener {
                registration,
                scope,
            } => {
                cache.listeners.insert(registration, scope);
                Response::Ok
            }
            RequestOp::RemoveListener { registration } => {
                cache.listeners.remove(&registration);
                Response::Ok
            }
            RequestOp::GetAll { .. }
            | RequestOp::Query { .. }
            | RequestOp::InvokeAllKeys { .. }
            | RequestOp::InvokeAllFilter { .. } => Response::Error {
                message: "streaming operation sent as unary request".to_string(),
            },
        }
    }

    fn stream_items(&self, request: Request) -> Vec<Result<StreamItem>> {
        let mut state = self.state.lock().unwrap();
        let full_key = cache_key(&request.scope, &request.cache);
        let Some(cache) = state.get_mut(&full_key) else {
            return vec![Err(CoherenceError::Remote(format!(
                "no such cache: {}",
                request.cache
            )))];
        };
        cache.purge_expired();

        match request.op {
            RequestOp::GetAll { keys } => keys
                .iter()
                .filter_map(|key| {
                    cache.entries.get(key.as_ref()).map(|entry| {
                        Ok(StreamItem {
                            key: Some(key.clone()),
                            value: Some(entry.value.clone()),
                            error: None,
                        })
                    })
                })
                .collect(),
            RequestOp::Query { kind, filter } => {
                let filter: Value = match serde_json::from_slice(&filter) {
                    Ok(filter) => filter,
                    Err(err) => {
                        return vec![Err(CoherenceError::Remote(format!(
                            "malformed filter: {err}"
                        )))]
                    }
                };
                cache
                    .entries
                    .iter()
                    .filter(|(_, entry)| filter_matches_value(&filter, &entry.value))
                    .map(|(key, entry)| Ok(stream_item(kind, key, entry.value.clone())))
                    .collect()
            }
            RequestOp::InvokeAllKeys { keys, processor } => keys
                .iter()
                .map(|key| Ok(processor_item(cache, key.as_ref(), &processor)))
                .collect(),
            RequestOp::InvokeAllFilter { filter, processor } => {
                let filter: Value = match serde_json::from_slice(&filter) {
                    Ok(filter) => filter,
                    Err(err) => {
                        return vec![Err(CoherenceError::Remote(format!(
                            "malformed filter: {err}"
                        )))]
                    }
                };
                let keys: Vec<Vec<u8>> = cache
                    .entries
                    .iter()
                    .filter(|(_, entry)| filter_matches_value(&filter, &entry.value))
                    .map(|(key, _)| key.clone())
                    .collect();
                keys.iter()
                    .map(|key| Ok(processor_item(cache, key, &processor)))
                    .collect()
            }
            _ => vec![Err(CoherenceError::Protocol(
                "unary operation sent as stream request".to_string(),
            ))],
        }
    }
}

#[async_trait]
impl Transport for InMemoryGrid {
    async fn invoke(&self, request: Request, timeout: Duration) -> Result<Response> {
        let latency = self
            .cache_latency
            .lock()
            .unwrap()
            .get(&request.cache)
            .copied()
            .or(*self.latency.lock().unwrap());
        if let Some(delay) = latency {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(CoherenceError::Cancelled {
                    disposition: Disposition::Unknown,
                });
            }
            tokio::time::sleep(delay).await;
        }
        Ok(self.apply(request))
    }

    async fn invoke_stream(
        &self,
        request: Request,
    ) -> Result<mpsc::Receiver<Result<StreamItem>>> {
        let items = self.stream_items(request);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerPush> {
        match self.push_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    async fn close(&self) -> Result<()> {
        self.push_tx.lock().unwrap().take();
        Ok(())
    }
}

fn cache_key(scope: &str, cache: &str) -> String {
    format!("{scope}:{cache}")
}

fn json_eq(a: &[u8], b: &[u8]) -> bool {
    match (
        serde_json::from_slice::<Value>(a),
        serde_json::from_slice::<Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn stream_item(kind: IterationKind, key: &[u8], value: Bytes) -> StreamItem {
    match kind {
        IterationKind::Keys => StreamItem {
            key: Some(Bytes::copy_from_slice(key)),
            value: None,
            error: None,
        },
        IterationKind::Values => StreamItem {
            key: None,
            value: Some(value),
            error: None,
        },
        IterationKind::Entries => StreamItem {
            key: Some(Bytes::copy_from_slice(key)),
            value: Some(value),
            error: None,
        },
    }
}

/// Test filter format: `{"always": true}` matches everything;
/// `{"equals": {"field": f, "value": v}}` matches objects whose field `f`
/// equals `v`.
fn filter_matches_value(filter: &Value, value: &Bytes) -> bool {
    if filter.get("always").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    if let Some(equals) = filter.get("equals") {
        let (Some(field), Some(expected)) =
            (equals.get("field").and_then(Value::as_str), equals.get("value"))
        else {
            return false;
        };
        let Ok(decoded) = serde_json::from_slice::<Value>(value) else {
            return false;
        };
        return decoded.get(field) == Some(expected);
    }
    false
}

/// Test processor format: `{"increment": n}` adds `n` to a numeric value
/// (treating an absent entry as zero) and returns the new value;
/// `{"fail": msg}` throws for the entry.
fn run_processor(
    cache: &mut CacheState,
    key: &[u8],
    processor: &Bytes,
) -> std::result::Result<Bytes, String> {
    let processor: Value =
        serde_json::from_slice(processor).map_err(|err| format!("malformed processor: {err}"))?;
    if let Some(message) = processor.get("fail").and_then(Value::as_str) {
        return Err(message.to_string());
    }
    if let Some(amount) = processor.get("increment").and_then(Value::as_i64) {
        let current = cache
            .entries
            .get(key)
            .and_then(|entry| serde_json::from_slice::<i64>(&entry.value).ok())
            .unwrap_or(0);
        let updated = current + amount;
        let encoded = Bytes::from(serde_json::to_vec(&updated).unwrap());
        cache.entries.insert(
            key.to_vec(),
            StoredEntry {
                value: encoded.clone(),
                expires_at: None,
            },
        );
        return Ok(encoded);
    }
    Err("unknown processor".to_string())
}

fn processor_item(cache: &mut CacheState, key: &[u8], processor: &Bytes) -> StreamItem {
    match run_processor(cache, key, processor) {
        Ok(result) => StreamItem {
            key: Some(Bytes::copy_from_slice(key)),
            value: Some(result),
            error: None,
        },
        Err(message) => StreamItem {
            key: Some(Bytes::copy_from_slice(key)),
            value: None,
            error: Some(message),
        },
    }
}

/// A session over a fresh in-process grid, scoped to `"test"`.
pub fn test_session() -> (Session, Arc<InMemoryGrid>) {
    let grid = Arc::new(InMemoryGrid::new());
    let config = SessionConfig::builder()
        .scope("test")
        .request_timeout(Duration::from_secs(5))
        .build()
        .expect("test config is valid");
    let session = Session::with_transport(config, Arc::clone(&grid) as Arc<dyn Transport>);
    (session, grid)
}

/// Polls `check` until it holds or the deadline passes.
pub async fn eventually<F>(deadline: Duration, check: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: u32,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self {
        Self {
            name: name.to_string(),
            age,
        }
    }
}

pub fn always_filter() -> Filter {
    Filter::from_bytes(Bytes::from_static(br#"{"always":true}"#))
}

pub fn field_equals_filter(field: &str, value: Value) -> Filter {
    let filter = json!({ "equals": { "field": field, "value": value } });
    Filter::from_bytes(Bytes::from(serde_json::to_vec(&filter).unwrap()))
}

pub fn increment_processor(amount: i64) -> Processor {
    let processor = json!({ "increment": amount });
    Processor::from_bytes(Bytes::from(serde_json::to_vec(&processor).unwrap()))
}

pub fn failing_processor(message: &str) -> Processor {
    let processor = json!({ "fail": message });
    Processor::from_bytes(Bytes::from(serde_json::to_vec(&processor).unwrap()))
}

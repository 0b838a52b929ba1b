//! Request, response, and server-push message types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single request addressed to a named cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The cache name the operation targets.
    pub cache: String,
    /// The session's namespace prefix; an empty string means the default
    /// scope.
    pub scope: String,
    /// The operation to perform.
    pub op: RequestOp,
}

/// The kind of items produced by a scan or query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IterationKind {
    /// Keys only.
    Keys,
    /// Values only.
    Values,
    /// Key-value pairs.
    Entries,
}

/// The scope of a server-side listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerScope {
    /// Events for every entry in the cache.
    All,
    /// Events for a single key, given in wire form.
    Key(Bytes),
    /// Events for entries matching an opaque filter descriptor.
    Filter(Bytes),
}

/// Operations understood by the grid. Keys, values, filters, and processors
/// are carried in type-erased wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestOp {
    /// Ensures the named cache exists on the grid.
    Ensure,
    /// Returns the value mapped to a key, if any.
    Get { key: Bytes },
    /// Returns the values for each of the given keys that is present,
    /// streamed as entries.
    GetAll { keys: Vec<Bytes> },
    /// Maps a key to a value, returning the previous value. A `ttl_millis`
    /// of zero selects the cache-level default expiry.
    Put {
        key: Bytes,
        value: Bytes,
        ttl_millis: u64,
    },
    /// Maps a key to a value only if no mapping exists; returns the existing
    /// value otherwise.
    PutIfAbsent { key: Bytes, value: Bytes },
    /// Bulk upsert. Applied all-or-nothing within this single request: the
    /// server stages every entry and commits only if all are accepted.
    PutAll { entries: Vec<(Bytes, Bytes)> },
    /// Replaces the value for a key only if a mapping exists.
    Replace { key: Bytes, value: Bytes },
    /// Replaces the value for a key only if the current value equals
    /// `expected` by decoded equality.
    ReplaceMapping {
        key: Bytes,
        expected: Bytes,
        value: Bytes,
    },
    /// Removes the mapping for a key, returning the previous value.
    Remove { key: Bytes },
    /// Removes the mapping only if the current value equals `value`.
    RemoveMapping { key: Bytes, value: Bytes },
    /// Returns whether a mapping for the key exists.
    ContainsKey { key: Bytes },
    /// Returns whether any key maps to the given value.
    ContainsValue { value: Bytes },
    /// Returns whether the exact key-to-value mapping exists.
    ContainsEntry { key: Bytes, value: Bytes },
    /// Returns the number of mappings.
    Size,
    /// Returns whether the cache holds no mappings.
    IsEmpty,
    /// Removes all mappings. Fires no per-entry events.
    Clear,
    /// Fast clear. Fires a single Truncated lifecycle event.
    Truncate,
    /// Removes the cache from the grid entirely.
    Destroy,
    /// Fetches one page of a scan. A `None` cookie starts from the beginning.
    Page {
        kind: IterationKind,
        cookie: Option<Bytes>,
        batch: u32,
    },
    /// Streams every item matching an opaque filter descriptor.
    Query { kind: IterationKind, filter: Bytes },
    /// Executes a server-side processor against one entry.
    Invoke { key: Bytes, processor: Bytes },
    /// Executes a processor against each of the given keys, streaming
    /// per-entry results.
    InvokeAllKeys { keys: Vec<Bytes>, processor: Bytes },
    /// Executes a processor against every entry matching a filter, streaming
    /// per-entry results.
    InvokeAllFilter { filter: Bytes, processor: Bytes },
    /// Registers a listener with the given scope.
    AddListener {
        registration: Uuid,
        scope: ListenerScope,
    },
    /// Removes a previously registered listener. A no-op when the
    /// registration is unknown.
    RemoveListener { registration: Uuid },
}

/// One element of a streamed result.
///
/// Key-only streams populate `key`, value-only streams populate `value`, and
/// entry streams populate both. A populated `error` carries a per-entry
/// server fault (for example a processor that threw for that entry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamItem {
    /// The wire form of the item's key, when the stream carries keys.
    pub key: Option<Bytes>,
    /// The wire form of the item's value or result, when present.
    pub value: Option<Bytes>,
    /// A per-entry fault message, mutually exclusive with `value`.
    pub error: Option<String>,
}

/// A response to a unary request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// The operation completed and produces no payload.
    Ok,
    /// An optional type-erased value (e.g. the previous mapping).
    Value(Option<Bytes>),
    /// A boolean result.
    Bool(bool),
    /// A numeric result.
    Int(i64),
    /// One page of a scan. A `None` cookie signals exhaustion.
    Page {
        entries: Vec<StreamItem>,
        cookie: Option<Bytes>,
    },
    /// The server reported an operational fault.
    Error { message: String },
}

/// The kind of a per-entry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryEventKind {
    /// A new mapping was created.
    Inserted,
    /// An existing mapping's value changed.
    Updated,
    /// A mapping was removed.
    Deleted,
}

/// A server-pushed per-entry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPush {
    /// The cache the event originated from.
    pub cache: String,
    /// The session scope the cache belongs to.
    pub scope: String,
    /// What happened to the entry.
    pub kind: EntryEventKind,
    /// The affected key, in wire form.
    pub key: Bytes,
    /// The previous value, present for updates and deletes.
    pub old: Option<Bytes>,
    /// The new value, present for inserts and updates.
    pub new: Option<Bytes>,
    /// Registration ids of filter-scoped listeners the server matched this
    /// event against. Key- and all-scoped registrations match client-side.
    pub filter_matches: Vec<Uuid>,
}

/// The kind of a whole-cache lifecycle event pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleKind {
    /// All entries were removed at once.
    Truncated,
    /// The cache was removed from the grid.
    Destroyed,
}

/// A server-pushed lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePush {
    /// The cache the event refers to.
    pub cache: String,
    /// The session scope the cache belongs to.
    pub scope: String,
    /// What happened to the cache.
    pub kind: LifecycleKind,
}

/// A frame pushed by the server outside the request/response cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerPush {
    /// A per-entry event.
    Entry(EntryPush),
    /// A whole-cache lifecycle event.
    Lifecycle(LifecyclePush),
}

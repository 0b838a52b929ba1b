//! Async client for a Coherence-style in-memory data grid.
//!
//! A [`Session`] owns one multiplexed connection to a grid endpoint and
//! hands out typed [`NamedCache`] handles. Handles expose map-style CRUD
//! and conditional operations, server-side queries and entry processors,
//! server-pushed entry and lifecycle events, and paged iteration over
//! whole caches.
//!
//! ```ignore
//! use coherence_client::{Session, SessionConfig};
//!
//! let session = Session::connect(SessionConfig::default()).await?;
//! let people = session.get_cache::<i64, Person>("people").await?;
//!
//! people.put(&1, &Person::new("Tim", 25)).await?;
//! assert_eq!(people.get(&1).await?.map(|p| p.age), Some(25));
//!
//! session.close().await?;
//! ```
//!
//! Keys and values are serialized per call; the grid stores only the wire
//! form. Every handle is cheap to clone and safe to share across tasks.

#![warn(missing_docs)]

pub mod config;
pub mod listener;
pub mod proxy;
pub mod query;
pub mod session;
pub mod transport;

pub use coherence_core::{CoherenceError, Disposition, Result};

pub use config::{SessionConfig, SessionConfigBuilder, TlsMode};
pub use listener::{
    FnLifecycleListener, FnLifecycleListenerBuilder, FnMapListener, FnMapListenerBuilder,
    ListenerRegistration, MapEvent, MapEventKind, MapLifecycleEvent, MapLifecycleKind,
    MapLifecycleListener, MapListener,
};
pub use proxy::{NamedCache, PagedIterator};
pub use query::{Filter, Processor, QueryResults};
pub use session::{Session, SessionState};
pub use transport::{TcpTransport, Transport};

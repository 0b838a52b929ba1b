//! Core types shared by the Coherence Rust client.
//!
//! This crate holds the pieces of the client that do no I/O: the error
//! model, the serialization boundary between typed handles and type-erased
//! wire payloads, and the request/response/push message model exchanged with
//! the grid. The `coherence-client` crate builds the session, cache proxies,
//! and transport on top of these.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod serialization;

pub use error::{CoherenceError, Disposition, Result};
pub use serialization::{decode, encode};

//! The session channel boundary.
//!
//! A [`Transport`] is the bidirectional streaming capability a
//! [`Session`](crate::Session) consumes: unary request/response, streamed
//! per-item results, and a persistent server-push stream, all multiplexed
//! over one logical connection. The bundled [`TcpTransport`] speaks
//! length-delimited frames over plaintext TCP; alternative transports plug
//! in through [`Session::with_transport`](crate::Session::with_transport).

mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use coherence_core::protocol::{Request, Response, ServerPush, StreamItem};
use coherence_core::Result;
use tokio::sync::{broadcast, mpsc};

pub use tcp::TcpTransport;

/// A bidirectional streaming channel to a grid endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a unary request and awaits its response within `timeout`.
    ///
    /// On timeout the transport reports
    /// [`CoherenceError::Cancelled`](coherence_core::CoherenceError::Cancelled)
    /// with an accurate disposition: `NotApplied` when the request is known
    /// never to have reached the wire, `Unknown` otherwise.
    async fn invoke(&self, request: Request, timeout: Duration) -> Result<Response>;

    /// Sends a request whose results arrive as a finite stream of items.
    /// The stream ends when the receiver is drained; a per-item fault
    /// arrives as an `Err` element without ending the stream.
    async fn invoke_stream(&self, request: Request)
        -> Result<mpsc::Receiver<Result<StreamItem>>>;

    /// Subscribes to the server-push stream (entry and lifecycle events).
    fn subscribe(&self) -> broadcast::Receiver<ServerPush>;

    /// Closes the channel. In-flight requests fail with a connection error.
    async fn close(&self) -> Result<()>;
}

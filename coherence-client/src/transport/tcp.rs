//! Bundled plaintext TCP transport.
//!
//! Frames are length-delimited JSON. Concurrent in-flight requests are
//! multiplexed over the single connection by correlation id: a reader task
//! demultiplexes responses back to the originating caller, routes streamed
//! items to their per-request channel, and fans server pushes into a
//! broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use coherence_core::protocol::{Request, Response, ServerPush, StreamItem};
use coherence_core::{CoherenceError, Disposition, Result};

use crate::config::{SessionConfig, TlsMode};
use crate::transport::Transport;

/// Capacity of the server-push broadcast channel.
const PUSH_CHANNEL_CAPACITY: usize = 1024;
/// Capacity of each streamed-result channel.
const STREAM_CHANNEL_CAPACITY: usize = 64;
/// Capacity of the outbound write queue.
const WRITE_QUEUE_CAPACITY: usize = 256;

/// A frame on the wire, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireFrame {
    /// Client-to-server request tagged with its correlation id.
    Request { id: u64, request: Request },
    /// Server-to-client unary response.
    Response { id: u64, response: Response },
    /// One element of a streamed result.
    Stream { id: u64, item: StreamItem },
    /// End of a streamed result.
    StreamEnd { id: u64 },
    /// Server push outside any request/response cycle.
    Push(ServerPush),
}

struct Pending {
    tx: oneshot::Sender<Result<Response>>,
    /// Set by the writer task once the request has been flushed to the
    /// socket; decides the disposition reported on timeout.
    written: Arc<AtomicBool>,
}

struct Outbound {
    frame: WireFrame,
    written: Option<Arc<AtomicBool>>,
}

struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    streams: Mutex<HashMap<u64, mpsc::Sender<Result<StreamItem>>>>,
    /// Taken (and thereby dropped) on teardown so subscribers observe
    /// `RecvError::Closed` when the connection is gone.
    push_tx: Mutex<Option<broadcast::Sender<ServerPush>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn fail_all_in_flight(&self, reason: &str) {
        let pending: Vec<Pending> = {
            let mut guard = self.pending.lock().expect("pending lock poisoned");
            guard.drain().map(|(_, p)| p).collect()
        };
        for entry in pending {
            let _ = entry
                .tx
                .send(Err(CoherenceError::Connection(reason.to_string())));
        }

        let streams: Vec<mpsc::Sender<Result<StreamItem>>> = {
            let mut guard = self.streams.lock().expect("streams lock poisoned");
            guard.drain().map(|(_, tx)| tx).collect()
        };
        for tx in streams {
            let _ = tx.try_send(Err(CoherenceError::Connection(reason.to_string())));
        }
    }
}

/// A plaintext TCP implementation of [`Transport`].
pub struct TcpTransport {
    shared: Arc<Shared>,
    writer_tx: Mutex<Option<mpsc::Sender<Outbound>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl TcpTransport {
    /// Connects to the grid endpoint named in the configuration.
    ///
    /// The bundled transport speaks plaintext only; TLS modes require a
    /// TLS-capable transport supplied through
    /// [`Session::with_transport`](crate::Session::with_transport).
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        if config.tls_mode() != TlsMode::Plaintext {
            return Err(CoherenceError::Configuration(
                "the bundled TCP transport supports plaintext only; \
                 supply a TLS-capable transport via Session::with_transport"
                    .to_string(),
            ));
        }

        let address = config.address();
        let stream = tokio::time::timeout(config.ready_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| {
                CoherenceError::Connection(format!("timed out connecting to {address}"))
            })?
            .map_err(|err| {
                CoherenceError::Connection(format!("failed to connect to {address}: {err}"))
            })?;

        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut sink, mut frames) = framed.split();

        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            push_tx: Mutex::new(Some(push_tx)),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let (writer_tx, mut writer_rx) = mpsc::channel::<Outbound>(WRITE_QUEUE_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(outbound) = writer_rx.recv().await {
                let encoded = match serde_json::to_vec(&outbound.frame) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode outbound frame");
                        continue;
                    }
                };
                if sink.send(Bytes::from(encoded)).await.is_err() {
                    break;
                }
                if let Some(written) = outbound.written {
                    written.store(true, Ordering::SeqCst);
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::debug!(error = %err, "transport read failed");
                        break;
                    }
                };
                let frame: WireFrame = match serde_json::from_slice(&bytes) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping malformed frame");
                        continue;
                    }
                };
                route_inbound(&reader_shared, frame).await;
            }
            reader_shared.closed.store(true, Ordering::SeqCst);
            reader_shared
                .push_tx
                .lock()
                .expect("push lock poisoned")
                .take();
            reader_shared.fail_all_in_flight("connection closed");
        });

        Ok(Self {
            shared,
            writer_tx: Mutex::new(Some(writer_tx)),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }

    fn outbound_sender(&self) -> Result<mpsc::Sender<Outbound>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(CoherenceError::Connection("transport is closed".to_string()));
        }
        self.writer_tx
            .lock()
            .expect("writer lock poisoned")
            .clone()
            .ok_or_else(|| CoherenceError::Connection("transport is closed".to_string()))
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

async fn route_inbound(shared: &Arc<Shared>, frame: WireFrame) {
    match frame {
        WireFrame::Response { id, response } => {
            let pending = {
                let mut guard = shared.pending.lock().expect("pending lock poisoned");
                guard.remove(&id)
            };
            if let Some(entry) = pending {
                let _ = entry.tx.send(Ok(response));
                return;
            }
            // A response for a streamed request is a fault terminating it.
            let stream = {
                let mut guard = shared.streams.lock().expect("streams lock poisoned");
                guard.remove(&id)
            };
            if let Some(tx) = stream {
                let message = match response {
                    Response::Error { message } => message,
                    other => format!("unexpected response for streamed request: {other:?}"),
                };
                let _ = tx.send(Err(CoherenceError::Remote(message))).await;
            }
        }
        WireFrame::Stream { id, item } => {
            let tx = {
                let guard = shared.streams.lock().expect("streams lock poisoned");
                guard.get(&id).cloned()
            };
            if let Some(tx) = tx {
                let _ = tx.send(Ok(item)).await;
            }
        }
        WireFrame::StreamEnd { id } => {
            let mut guard = shared.streams.lock().expect("streams lock poisoned");
            guard.remove(&id);
        }
        WireFrame::Push(push) => {
            // Send fails only when nobody is subscribed, which is fine.
            if let Some(tx) = shared.push_tx.lock().expect("push lock poisoned").as_ref() {
                let _ = tx.send(push);
            }
        }
        WireFrame::Request { .. } => {
            tracing::warn!("server sent a request frame; dropping");
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn invoke(&self, request: Request, timeout: Duration) -> Result<Response> {
        let sender = self.outbound_sender()?;
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        let written = Arc::new(AtomicBool::new(false));

        {
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            pending.insert(
                id,
                Pending {
                    tx,
                    written: Arc::clone(&written),
                },
            );
        }

        let outbound = Outbound {
            frame: WireFrame::Request { id, request },
            written: Some(Arc::clone(&written)),
        };
        if sender.send(outbound).await.is_err() {
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            pending.remove(&id);
            return Err(CoherenceError::Connection("transport is closed".to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoherenceError::Connection(
                "connection closed while awaiting response".to_string(),
            )),
            Err(_) => {
                let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
                pending.remove(&id);
                let disposition = if written.load(Ordering::SeqCst) {
                    Disposition::Unknown
                } else {
                    Disposition::NotApplied
                };
                Err(CoherenceError::Cancelled { disposition })
            }
        }
    }

    async fn invoke_stream(
        &self,
        request: Request,
    ) -> Result<mpsc::Receiver<Result<StreamItem>>> {
        let sender = self.outbound_sender()?;
        let id = self.next_id();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        {
            let mut streams = self.shared.streams.lock().expect("streams lock poisoned");
            streams.insert(id, tx);
        }

        let outbound = Outbound {
            frame: WireFrame::Request { id, request },
            written: None,
        };
        if sender.send(outbound).await.is_err() {
            let mut streams = self.shared.streams.lock().expect("streams lock poisoned");
            streams.remove(&id);
            return Err(CoherenceError::Connection("transport is closed".to_string()));
        }

        Ok(rx)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerPush> {
        match self.shared.push_tx.lock().expect("push lock poisoned").as_ref() {
            Some(tx) => tx.subscribe(),
            // Already torn down: hand out a receiver that reports Closed.
            None => broadcast::channel(1).1,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the queue ends the writer task, which closes the socket.
        self.writer_tx.lock().expect("writer lock poisoned").take();
        if let Some(handle) = self.reader.lock().expect("reader lock poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.writer.lock().expect("writer lock poisoned").take() {
            handle.abort();
        }
        // Dropping the push sender lets subscriber tasks wind down.
        self.shared.push_tx.lock().expect("push lock poisoned").take();
        self.shared.fail_all_in_flight("transport closed");
        tracing::debug!("tcp transport closed");
        Ok(())
    }
}

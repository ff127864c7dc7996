use std::sync::Arc;

use async_trait::async_trait;
use storehub_core::ConnId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{HubError, Result};

/// One serialized message. A broadcast serializes once and every recipient
/// shares the same allocation.
pub type Payload = Arc<str>;

/// Write half of a live transport.
///
/// The gateway implements this over the WebSocket sink; tests use in-memory
/// doubles. Only the connection's [`WriteLoop`] ever calls it.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one payload as a single text frame.
    async fn send_text(&mut self, payload: &str) -> Result<()>;

    /// Send the close control frame.
    async fn close(&mut self) -> Result<()>;
}

/// A freshly upgraded connection that has not been registered yet and so
/// has no identity.
pub struct PendingConnection {
    remote: String,
    outbound: mpsc::Sender<Payload>,
    transport: CancellationToken,
}

impl PendingConnection {
    /// Create the connection and the receiving end of its outbound queue.
    /// `capacity` is clamped to at least one slot.
    pub fn new(remote: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let pending = Self {
            remote: remote.into(),
            outbound,
            transport: CancellationToken::new(),
        };
        (pending, rx)
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Fired when the hub drops this connection or its write loop fails.
    /// The read half of the transport stops when it sees this.
    pub fn transport(&self) -> CancellationToken {
        self.transport.clone()
    }

    pub(crate) fn into_connection(self, id: ConnId) -> Connection {
        Connection {
            id,
            remote: self.remote,
            outbound: self.outbound,
            transport: self.transport,
        }
    }
}

/// A registered connection as the registry holds it.
///
/// Holds the only sender of the outbound queue: dropping the `Connection`
/// closes the queue, which is what ends its write loop.
pub(crate) struct Connection {
    id: ConnId,
    remote: String,
    outbound: mpsc::Sender<Payload>,
    transport: CancellationToken,
}

impl Connection {
    pub(crate) fn id(&self) -> ConnId {
        self.id
    }

    pub(crate) fn remote(&self) -> &str {
        &self.remote
    }

    /// Append to the outbound queue without waiting.
    pub(crate) fn enqueue(&self, payload: Payload) -> Result<()> {
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => HubError::QueueFull { id: self.id },
            TrySendError::Closed(_) => HubError::QueueClosed { id: self.id },
        })
    }

    /// False once the write loop has gone away.
    pub(crate) fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Signal the transport to close, then close the queue by dropping the
    /// sender. Consuming `self` makes a second close impossible.
    pub(crate) fn close(self) {
        self.transport.cancel();
    }
}

/// How a write loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Queue closed and fully flushed; a close frame was sent.
    Drained,
    /// A transport write failed; remaining frames were abandoned.
    Failed,
}

/// Drains one connection's outbound queue onto its transport, in order.
pub struct WriteLoop<S> {
    id: ConnId,
    sink: S,
    outbound: mpsc::Receiver<Payload>,
    transport: CancellationToken,
}

impl<S: FrameSink> WriteLoop<S> {
    pub fn new(
        id: ConnId,
        sink: S,
        outbound: mpsc::Receiver<Payload>,
        transport: CancellationToken,
    ) -> Self {
        Self {
            id,
            sink,
            outbound,
            transport,
        }
    }

    /// Runs until the queue is closed and empty, or a write fails.
    pub async fn run(mut self) -> WriteOutcome {
        while let Some(payload) = self.outbound.recv().await {
            if let Err(e) = self.sink.send_text(&payload).await {
                warn!(conn_id = %self.id, error = %e, "write failed, abandoning connection");
                // stops the read half; the hub drops the registration
                self.transport.cancel();
                return WriteOutcome::Failed;
            }
        }

        if let Err(e) = self.sink.close().await {
            debug!(conn_id = %self.id, error = %e, "close frame not delivered");
        }
        debug!(conn_id = %self.id, "write loop drained");
        WriteOutcome::Drained
    }
}

use storehub_core::ConnId;
use thiserror::Error;

/// Errors surfaced by the hub. None of them cascade past the connection
/// they concern.
#[derive(Debug, Error)]
pub enum HubError {
    /// The event loop has shut down and no longer accepts signals.
    #[error("hub is stopped")]
    Stopped,

    /// The connection's outbound queue is at capacity.
    #[error("outbound queue full for {id}")]
    QueueFull { id: ConnId },

    /// The connection's write loop is gone.
    #[error("outbound queue closed for {id}")]
    QueueClosed { id: ConnId },

    /// Writing a frame to the underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

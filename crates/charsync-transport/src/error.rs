/// Boxed error from the underlying WebSocket library.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The WebSocket upgrade handshake failed.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] BoxError),

    #[error("send failed: {0}")]
    Send(#[source] BoxError),

    #[error("receive failed: {0}")]
    Receive(#[source] BoxError),

    /// The listener stopped and no more connections will arrive.
    #[error("listener closed")]
    Closed,
}

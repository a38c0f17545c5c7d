/// Errors produced by the transport implementations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was already closed; nothing more can be written.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),
}

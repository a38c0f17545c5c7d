//! Transport abstraction layer for roomhub.
//!
//! A room never talks to a socket directly. Each session drives a
//! [`Transport`]: a message-framed, full-duplex byte channel that splits
//! into independently owned read and write halves, so the session's two
//! loops can block on their own half without contending for a lock.
//!
//! Two implementations ship with the crate:
//!
//! - [`WebSocketTransport`] (feature `websocket`, on by default) wraps the
//!   socket produced by an `axum` upgrade.
//! - [`MemoryTransport`] is an in-process duplex pair, used by the test
//!   suites and by embedders who want to exercise room logic without
//!   network I/O.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryPeer, MemoryReader, MemoryTransport, MemoryWriter, PeerFrame};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReader, WebSocketTransport, WebSocketWriter};

use std::future::Future;

/// A message-framed full-duplex connection.
///
/// The returned futures are `Send` so sessions can run each half on its
/// own spawned task.
pub trait Transport: Send + 'static {
    /// The error type shared by both halves.
    type Error: std::error::Error + Send + Sync + 'static;
    /// The inbound half.
    type Reader: TransportReader<Error = Self::Error>;
    /// The outbound half.
    type Writer: TransportWriter<Error = Self::Error>;

    /// Splits the connection into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The inbound half of a [`Transport`].
pub trait TransportReader: Send + 'static {
    /// The error type for read operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for the next inbound message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    /// Any error is terminal for the connection.
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;
}

/// The outbound half of a [`Transport`].
pub trait TransportWriter: Send + 'static {
    /// The error type for write operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Writes one payload as a single binary message.
    fn send(
        &mut self,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Writes a protocol-level keepalive ping.
    fn ping(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

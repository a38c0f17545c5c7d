//! In-process transport: a pair of bounded queues standing in for a socket.
//!
//! [`MemoryTransport::duplex`] returns the server-side transport together
//! with a [`MemoryPeer`] playing the remote client. The peer can inject
//! payloads, observe what the session writes, close the connection cleanly,
//! or abort it mid-stream.

use std::io;

use tokio::sync::mpsc;

use crate::{Transport, TransportError, TransportReader, TransportWriter};

/// Frames buffered in each direction before senders suspend.
const CHANNEL_CAPACITY: usize = 64;

/// A frame observed on the peer end of a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// A binary payload written by the session.
    Binary(Vec<u8>),
    /// A protocol-level keepalive.
    Ping,
}

enum Inbound {
    Frame(Vec<u8>),
    Abort,
}

/// The server side of an in-process connection.
pub struct MemoryTransport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<PeerFrame>,
}

impl MemoryTransport {
    /// Creates a connected transport/peer pair.
    pub fn duplex() -> (MemoryTransport, MemoryPeer) {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            MemoryTransport {
                inbound: inbound_rx,
                outbound: outbound_tx,
            },
            MemoryPeer {
                inbound: Some(inbound_tx),
                outbound: outbound_rx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    type Error = TransportError;
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (MemoryReader, MemoryWriter) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: Some(self.outbound),
            },
        )
    }
}

/// Read half of a [`MemoryTransport`].
pub struct MemoryReader {
    inbound: mpsc::Receiver<Inbound>,
}

impl TransportReader for MemoryReader {
    type Error = TransportError;

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(payload)) => Ok(Some(payload)),
            Some(Inbound::Abort) => Err(TransportError::Receive(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer aborted the connection",
            ))),
            None => Ok(None),
        }
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemoryWriter {
    outbound: Option<mpsc::Sender<PeerFrame>>,
}

impl MemoryWriter {
    async fn write(&mut self, frame: PeerFrame) -> Result<(), TransportError> {
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::Closed("transport closed".into()));
        };
        outbound.send(frame).await.map_err(|_| {
            TransportError::Send(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer receiver dropped",
            ))
        })
    }
}

impl TransportWriter for MemoryWriter {
    type Error = TransportError;

    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.write(PeerFrame::Binary(payload)).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.write(PeerFrame::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound.take();
        Ok(())
    }
}

/// The remote end of an in-process connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::Sender<Inbound>>,
    outbound: mpsc::Receiver<PeerFrame>,
}

impl MemoryPeer {
    /// Delivers a payload to the session's read loop.
    ///
    /// Silently ignored once the peer has closed its side.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Inbound::Frame(payload.into())).await;
        }
    }

    /// Next frame written by the session, or `None` once the transport
    /// is closed and drained.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.outbound.recv().await
    }

    /// Closes the connection cleanly, as a well-behaved client would.
    pub fn close(&mut self) {
        self.inbound.take();
    }

    /// Kills the connection mid-stream: the session's next read fails.
    pub async fn abort(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            let _ = inbound.send(Inbound::Abort).await;
        }
    }
}

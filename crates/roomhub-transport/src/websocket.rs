//! WebSocket transport over an upgraded `axum` connection.

use std::io;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::{Transport, TransportError, TransportReader, TransportWriter};

/// Payload carried by keepalive pings.
const PING_PAYLOAD: &[u8] = b"ping";

/// A WebSocket-backed [`Transport`].
///
/// Wraps the socket handed to the callback of
/// `WebSocketUpgrade::on_upgrade`.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    /// Wraps an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    type Error = TransportError;
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.socket.split();
        (WebSocketReader { stream }, WebSocketWriter { sink })
    }
}

/// Read half of a [`WebSocketTransport`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

impl TransportReader for WebSocketReader {
    type Error = TransportError;

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong
                Some(Err(e)) => {
                    return Err(TransportError::Receive(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }
}

/// Write half of a [`WebSocketTransport`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl TransportWriter for WebSocketWriter {
    type Error = TransportError;

    async fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(payload.into()))
            .await
            .map_err(|e| {
                TransportError::Send(io::Error::new(io::ErrorKind::BrokenPipe, e))
            })
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(PING_PAYLOAD.to_vec().into()))
            .await
            .map_err(|e| {
                TransportError::Send(io::Error::new(io::ErrorKind::BrokenPipe, e))
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(|e| {
            TransportError::Send(io::Error::new(io::ErrorKind::BrokenPipe, e))
        })
    }
}

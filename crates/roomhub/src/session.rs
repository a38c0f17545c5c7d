//! Socket sessions: the pair of loops that bridge one transport to a room.
//!
//! A session owns its transport exclusively. The read loop forwards
//! inbound payloads to the room's event queue and reports the connection's
//! death exactly once; the write loop drains the outbound queue and keeps
//! the connection alive with periodic pings. Either loop exiting cancels
//! the session token, which brings the other one down and closes the
//! transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use roomhub_transport::{Transport, TransportReader, TransportWriter};

use crate::MemberKey;

/// Outbound frames queued per session before back-pressure applies.
pub(crate) const SEND_QUEUE_CAPACITY: usize = 255;

/// Cadence of protocol-level keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// An event a session injects into its room's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent<M> {
    /// An inbound application payload.
    Message { member: M, payload: Vec<u8> },
    /// The transport failed or was closed by the peer.
    Disconnect { member: M },
}

/// Sender half of a room's event queue, handed to each session.
pub type EventSink<M> = mpsc::Sender<SessionEvent<M>>;

/// The runtime wrapper around a single live connection.
///
/// Cheap to clone; all clones refer to the same connection. Sessions are
/// normally created through [`Room::admit`](crate::Room::admit), which
/// also registers them; [`SocketSession::spawn`] is the lower-level
/// entry point for callers wiring up a custom transport by hand.
#[derive(Clone)]
pub struct SocketSession<M> {
    shared: Arc<Shared<M>>,
}

struct Shared<M> {
    member_id: M,
    outbound: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: MemberKey> SocketSession<M> {
    /// Splits `transport` and starts the read and write loops.
    pub fn spawn<T: Transport>(transport: T, member_id: M, events: EventSink<M>) -> Self {
        let (reader, writer) = transport.split();
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let read_task = tokio::spawn(read_loop(
            reader,
            member_id.clone(),
            events,
            cancel.clone(),
        ));
        let write_task = tokio::spawn(write_loop(
            writer,
            member_id.clone(),
            outbound_rx,
            cancel.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                member_id,
                outbound: outbound_tx,
                cancel,
                tasks: Mutex::new(vec![read_task, write_task]),
            }),
        }
    }

    /// The identity this session was admitted under.
    pub fn member_id(&self) -> &M {
        &self.shared.member_id
    }

    /// Queues an outbound payload.
    ///
    /// Suspends while the queue is full (back-pressure on the caller);
    /// once the session is down the payload is dropped with a debug log.
    pub async fn send(&self, payload: Vec<u8>) {
        if self.shared.outbound.send(payload).await.is_err() {
            tracing::debug!(
                member = ?self.shared.member_id,
                "session closed, dropping outbound payload"
            );
        }
    }

    /// Tears the session down and waits for both loops to exit.
    ///
    /// Idempotent. When this returns the transport is closed and no task
    /// belonging to this session is still running.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let mut tasks = self.shared.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for SocketSession<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("member_id", &self.shared.member_id)
            .finish_non_exhaustive()
    }
}

/// Reads inbound messages until the transport dies or the session is
/// cancelled.
///
/// Emits exactly one `Disconnect` when the peer goes away (clean close or
/// error). A room-initiated cancellation emits nothing: the room has
/// already decided that member's fate.
async fn read_loop<R, M>(
    mut reader: R,
    member: M,
    events: EventSink<M>,
    cancel: CancellationToken,
) where
    R: TransportReader,
    M: MemberKey,
{
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.recv() => read,
        };
        match read {
            Ok(Some(payload)) => {
                let event = SessionEvent::Message {
                    member: member.clone(),
                    payload,
                };
                match cancel.run_until_cancelled(events.send(event)).await {
                    Some(Ok(())) => {}
                    Some(Err(_)) | None => break,
                }
            }
            Ok(None) => {
                tracing::debug!(member = ?member, "peer closed the connection");
                let disconnect = SessionEvent::Disconnect {
                    member: member.clone(),
                };
                let _ = cancel.run_until_cancelled(events.send(disconnect)).await;
                break;
            }
            Err(error) => {
                tracing::debug!(member = ?member, %error, "transport read failed");
                let disconnect = SessionEvent::Disconnect {
                    member: member.clone(),
                };
                let _ = cancel.run_until_cancelled(events.send(disconnect)).await;
                break;
            }
        }
    }
    cancel.cancel();
}

/// Drains the outbound queue and pings the peer on a fixed cadence.
///
/// Write failures are logged but never emit a disconnect of their own:
/// the read loop's subsequent failure is the single source of that event.
async fn write_loop<W, M>(
    mut writer: W,
    member: M,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) where
    W: TransportWriter,
    M: MemberKey,
{
    let mut ping = time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(error) = writer.send(payload).await {
                        tracing::warn!(member = ?member, %error, "transport write failed");
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if let Err(error) = writer.ping().await {
                    tracing::debug!(member = ?member, %error, "keepalive ping failed");
                }
            }
        }
    }
    if let Err(error) = writer.close().await {
        tracing::debug!(member = ?member, %error, "transport close failed");
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    use roomhub_transport::{MemoryTransport, PeerFrame};

    fn session_with_peer(
        member: &str,
    ) -> (
        SocketSession<String>,
        roomhub_transport::MemoryPeer,
        mpsc::Receiver<SessionEvent<String>>,
    ) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (transport, peer) = MemoryTransport::duplex();
        let session = SocketSession::spawn(transport, member.to_string(), events_tx);
        (session, peer, events_rx)
    }

    #[tokio::test]
    async fn test_inbound_payload_becomes_message_event() {
        let (session, peer, mut events) = session_with_peer("alice");

        peer.send(b"hi".to_vec()).await;

        let event = events.recv().await.expect("event should arrive");
        assert_eq!(
            event,
            SessionEvent::Message {
                member: "alice".to_string(),
                payload: b"hi".to_vec(),
            }
        );
        session.close().await;
    }

    #[tokio::test]
    async fn test_peer_close_emits_exactly_one_disconnect() {
        let (session, mut peer, mut events) = session_with_peer("alice");

        peer.close();

        let event = events.recv().await.expect("event should arrive");
        assert_eq!(
            event,
            SessionEvent::Disconnect {
                member: "alice".to_string(),
            }
        );
        session.close().await;
        assert!(events.try_recv().is_err(), "no second disconnect");
    }

    #[tokio::test]
    async fn test_peer_abort_emits_exactly_one_disconnect() {
        let (session, mut peer, mut events) = session_with_peer("alice");

        peer.abort().await;

        let event = events.recv().await.expect("event should arrive");
        assert_eq!(
            event,
            SessionEvent::Disconnect {
                member: "alice".to_string(),
            }
        );
        session.close().await;
        assert!(events.try_recv().is_err(), "no second disconnect");
    }

    #[tokio::test]
    async fn test_send_delivers_single_binary_frame() {
        let (session, mut peer, _events) = session_with_peer("alice");

        session.send(b"payload".to_vec()).await;

        assert_eq!(
            peer.recv().await,
            Some(PeerFrame::Binary(b"payload".to_vec()))
        );
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_fires_on_the_keepalive_cadence() {
        let (session, mut peer, _events) = session_with_peer("alice");

        // The paused clock auto-advances to the ping deadline once every
        // task is idle.
        assert_eq!(peer.recv().await, Some(PeerFrame::Ping));
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_emits_no_disconnect() {
        let (session, mut peer, mut events) = session_with_peer("alice");

        session.close().await;
        session.close().await;

        // The write loop closed the transport on its way out.
        assert_eq!(peer.recv().await, None);
        assert!(
            events.try_recv().is_err(),
            "room-initiated teardown must not emit a disconnect"
        );
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let (session, _peer, _events) = session_with_peer("alice");

        session.close().await;
        // Must not wedge or panic.
        session.send(b"late".to_vec()).await;
    }
}

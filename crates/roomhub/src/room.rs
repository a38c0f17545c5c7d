//! The room runtime: a serialized event loop over a shared member map.
//!
//! Each room runs one event-loop task that consumes session events,
//! handles disconnects, and sweeps out members who stayed disconnected
//! too long. Membership itself lives behind a readers-writer lock so that
//! admission checks, presence snapshots, and sends can be served from any
//! caller task without a round trip through the loop.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use roomhub_transport::Transport;

use crate::options::{MemberCallback, MessageCallback, RoomOptions};
use crate::presence::MemberPresence;
use crate::session::{EventSink, SessionEvent, SocketSession};
use crate::RoomStatus;

/// Capacity of the room's event queue.
const EVENT_QUEUE_CAPACITY: usize = 255;

/// Delay between registering a member and firing `on_connect`, so the
/// upgrade response reaches the client before application traffic does.
const CONNECT_NOTIFY_DELAY: Duration = Duration::from_millis(1);

/// Capabilities required of a room identifier.
pub trait RoomKey: Clone + Eq + fmt::Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + fmt::Debug + Send + Sync + 'static> RoomKey for T {}

/// Capabilities required of a member identifier.
pub trait MemberKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> MemberKey for T {}

/// A stateful container for a set of co-communicating members.
///
/// Cheap to clone; every clone refers to the same room. The event loop
/// does not run until [`Room::run`] is awaited (typically on a spawned
/// task), and the room stays usable for admission and sends until
/// [`Room::stop`] or the parent cancellation token ends it.
pub struct Room<R, M> {
    shared: Arc<RoomShared<R, M>>,
}

impl<R, M> Clone for Room<R, M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct RoomShared<R, M> {
    id: std::sync::RwLock<R>,
    started: AtomicBool,
    cleanup_period: Duration,
    callbacks: Callbacks<M>,
    roster: RwLock<Roster<M>>,
    events_tx: mpsc::Sender<SessionEvent<M>>,
    events_rx: Mutex<Option<mpsc::Receiver<SessionEvent<M>>>>,
    cancel: CancellationToken,
}

/// Membership state guarded by the room's readers-writer lock.
struct Roster<M> {
    status: RoomStatus,
    /// `None` marks a member who disconnected but is retained for a
    /// possible reconnection.
    members: HashMap<M, Option<SocketSession<M>>>,
    /// Populated exactly for the `None` entries of `members`.
    last_seen: HashMap<M, Instant>,
}

impl<M: MemberKey> Roster<M> {
    /// Admission decision over the current snapshot.
    fn admissible(&self, member: &M) -> bool {
        match self.status {
            RoomStatus::Inactive => false,
            status => match self.members.get(member) {
                // One connection per member.
                Some(Some(_)) => false,
                // A known member may reconnect, even under lock.
                Some(None) => true,
                None => status == RoomStatus::Open,
            },
        }
    }
}

/// Lifecycle callbacks, each dispatched on a fresh task so user code can
/// never stall the room loop.
struct Callbacks<M> {
    on_connect: Option<MemberCallback<M>>,
    on_disconnect: Option<MemberCallback<M>>,
    on_remove: Option<MemberCallback<M>>,
    on_message: Option<MessageCallback<M>>,
}

impl<M: MemberKey> Callbacks<M> {
    fn connect(&self, member: M) {
        if let Some(callback) = self.on_connect.clone() {
            tokio::spawn(async move {
                time::sleep(CONNECT_NOTIFY_DELAY).await;
                callback(member);
            });
        }
    }

    fn disconnect(&self, member: M) {
        if let Some(callback) = self.on_disconnect.clone() {
            tokio::spawn(async move { callback(member) });
        }
    }

    fn remove(&self, member: M) {
        if let Some(callback) = self.on_remove.clone() {
            tokio::spawn(async move { callback(member) });
        }
    }

    fn message(&self, member: M, payload: Vec<u8>) {
        if let Some(callback) = self.on_message.clone() {
            tokio::spawn(async move { callback(member, payload) });
        }
    }
}

impl<R: RoomKey, M: MemberKey> Room<R, M> {
    /// Creates a detached room scoped under `parent`.
    ///
    /// The room starts `Open` with no members; the event loop runs once
    /// [`Room::run`] is awaited.
    pub fn new(parent: &CancellationToken, id: R, options: RoomOptions<M>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let cleanup_period = options.effective_cleanup_period();
        Self {
            shared: Arc::new(RoomShared {
                id: std::sync::RwLock::new(id),
                started: AtomicBool::new(false),
                cleanup_period,
                callbacks: Callbacks {
                    on_connect: options.on_connect,
                    on_disconnect: options.on_disconnect,
                    on_remove: options.on_remove,
                    on_message: options.on_message,
                },
                roster: RwLock::new(Roster {
                    status: RoomStatus::Open,
                    members: HashMap::new(),
                    last_seen: HashMap::new(),
                }),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                cancel: parent.child_token(),
            }),
        }
    }

    /// The room's identifier.
    pub fn id(&self) -> R {
        self.shared
            .id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Renames the room.
    ///
    /// Only honoured before the event loop starts: once running, the id is
    /// carried in log fields and observed by callbacks, so it stays fixed.
    pub fn set_room_id(&self, id: R) {
        if self.shared.started.load(Ordering::Acquire) {
            tracing::warn!(room = ?self.id(), "ignoring id change on a started room");
            return;
        }
        *self
            .shared
            .id
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Current admission status.
    pub async fn status(&self) -> RoomStatus {
        self.shared.roster.read().await.status
    }

    /// The interval between cleanup sweeps.
    pub fn cleanup_period(&self) -> Duration {
        self.shared.cleanup_period
    }

    /// Sender half of the event queue, for sessions spawned by hand.
    pub fn event_sink(&self) -> EventSink<M> {
        self.shared.events_tx.clone()
    }

    /// Runs the room's event loop until the room is stopped or the parent
    /// token is cancelled.
    ///
    /// Usually spawned: the loop holds the sole receiver of the event
    /// queue, so a second call logs a warning and returns immediately.
    pub async fn run(&self) {
        let receiver = self.shared.events_rx.lock().await.take();
        let Some(mut events) = receiver else {
            tracing::warn!(room = ?self.id(), "event loop already started");
            return;
        };
        self.shared.started.store(true, Ordering::Release);
        tracing::debug!(room = ?self.id(), "event loop started");

        let mut sweep = time::interval_at(
            Instant::now() + self.shared.cleanup_period,
            self.shared.cleanup_period,
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(SessionEvent::Disconnect { member }) => {
                        self.handle_disconnect(member).await;
                    }
                    Some(SessionEvent::Message { member, payload }) => {
                        self.shared.callbacks.message(member, payload);
                    }
                    None => break,
                },
                _ = sweep.tick() => self.clean_up_disconnected().await,
            }
        }
        // Dropping the receiver here closes the queue exactly once; late
        // sends are discarded by their sessions.
        tracing::info!(room = ?self.id(), "event loop stopped");
    }

    /// Demotes a member to disconnected and stamps their last-seen time.
    ///
    /// A member the room no longer tracks (lock purge, membership
    /// replacement, stop) is not resurrected by a stale disconnect.
    async fn handle_disconnect(&self, member: M) {
        let mut roster = self.shared.roster.write().await;
        let Some(slot) = roster.members.get_mut(&member) else {
            return;
        };
        *slot = None;
        roster.last_seen.insert(member.clone(), Instant::now());
        drop(roster);
        tracing::debug!(room = ?self.id(), member = ?member, "member disconnected");
        self.shared.callbacks.disconnect(member);
    }

    /// Reports whether `member` would currently be admitted.
    ///
    /// `Inactive` admits nobody; a connected member is never admitted
    /// twice; a known disconnected member may reconnect even under
    /// `Locked`; an unknown member needs `Open`. A stopped room admits
    /// nobody.
    pub async fn can_join(&self, member: &M) -> bool {
        if self.shared.cancel.is_cancelled() {
            return false;
        }
        self.shared.roster.read().await.admissible(member)
    }

    /// Attaches a new connection for `member`: spawns its session and
    /// registers it with the room.
    ///
    /// Returns `false` (tearing the fresh session down) when admission
    /// was refused. On success, `on_connect` fires shortly afterwards.
    pub async fn admit<T: Transport>(&self, transport: T, member: M) -> bool {
        let session = SocketSession::spawn(transport, member.clone(), self.event_sink());
        self.register(session).await
    }

    /// Registers an already-spawned session under its member id.
    ///
    /// Admission is re-checked under the write lock, so a race between
    /// [`Room::can_join`] and the transport handshake can never seat two
    /// sessions for one member.
    pub async fn register(&self, session: SocketSession<M>) -> bool {
        let member = session.member_id().clone();
        let mut roster = self.shared.roster.write().await;
        if self.shared.cancel.is_cancelled() || !roster.admissible(&member) {
            drop(roster);
            tracing::warn!(
                room = ?self.id(),
                member = ?member,
                "admission lost before registration"
            );
            session.close().await;
            return false;
        }
        roster.last_seen.remove(&member);
        roster.members.insert(member.clone(), Some(session));
        drop(roster);
        tracing::info!(room = ?self.id(), member = ?member, "new socket connection");
        self.shared.callbacks.connect(member);
        true
    }

    /// Delivers `payload` to one connected member.
    ///
    /// Unknown or disconnected members are skipped silently. Suspends
    /// while that member's outbound queue is full (back-pressure).
    pub async fn send_to(&self, member: &M, payload: Vec<u8>) {
        let roster = self.shared.roster.read().await;
        match roster.members.get(member) {
            Some(Some(session)) => session.send(payload).await,
            _ => {
                tracing::debug!(
                    room = ?self.id(),
                    member = ?member,
                    "no live session, dropping payload"
                );
            }
        }
    }

    /// Delivers `payload` to every connected member.
    pub async fn send_all(&self, payload: Vec<u8>) {
        let roster = self.shared.roster.read().await;
        for session in roster.members.values().flatten() {
            session.send(payload.clone()).await;
        }
    }

    /// Snapshot of every known member's presence.
    pub async fn presence(&self) -> Vec<MemberPresence<M>> {
        let roster = self.shared.roster.read().await;
        roster
            .members
            .iter()
            .map(|(member, slot)| MemberPresence {
                member: member.clone(),
                is_connected: slot.is_some(),
                last_seen: roster.last_seen.get(member).copied(),
            })
            .collect()
    }

    /// Presence for a single member; unknown members read as disconnected
    /// and never seen.
    pub async fn member_presence(&self, member: &M) -> MemberPresence<M> {
        let roster = self.shared.roster.read().await;
        MemberPresence {
            member: member.clone(),
            is_connected: matches!(roster.members.get(member), Some(Some(_))),
            last_seen: roster.last_seen.get(member).copied(),
        }
    }

    /// Changes the admission status.
    ///
    /// Locking purges every disconnected member. Deactivating ejects the
    /// entire roster: disconnected members are purged and connected
    /// sessions are closed, each with `on_remove` scheduled. Setting the
    /// current status again is a no-op.
    pub async fn set_status(&self, status: RoomStatus) {
        let mut roster = self.shared.roster.write().await;
        if roster.status == status {
            return;
        }
        tracing::debug!(room = ?self.id(), %status, "setting status");
        roster.status = status;
        let mut to_close = Vec::new();
        match status {
            RoomStatus::Open => {}
            RoomStatus::Locked => {
                let disconnected: Vec<M> = roster
                    .members
                    .iter()
                    .filter(|(_, slot)| slot.is_none())
                    .map(|(member, _)| member.clone())
                    .collect();
                for member in disconnected {
                    self.forget(&mut roster, member);
                }
            }
            RoomStatus::Inactive => {
                let everyone: Vec<M> = roster.members.keys().cloned().collect();
                for member in everyone {
                    if let Some(Some(session)) = roster.members.get(&member) {
                        to_close.push(session.clone());
                    }
                    self.forget(&mut roster, member);
                }
            }
        }
        drop(roster);
        // Closed outside the lock: teardown waits on the session loops,
        // and the read side may be mid-send into the event queue.
        for session in to_close {
            session.close().await;
        }
    }

    /// Evicts members whose disconnection outlasted the cleanup period.
    ///
    /// Runs on every sweep tick; only an `Open` room evicts.
    pub async fn clean_up_disconnected(&self) {
        let mut roster = self.shared.roster.write().await;
        if roster.status != RoomStatus::Open {
            return;
        }
        let now = Instant::now();
        let expired: Vec<M> = roster
            .members
            .iter()
            .filter(|(member, slot)| {
                slot.is_none()
                    && roster.last_seen.get(*member).is_some_and(|seen| {
                        now.duration_since(*seen) > self.shared.cleanup_period
                    })
            })
            .map(|(member, _)| member.clone())
            .collect();
        for member in expired {
            self.forget(&mut roster, member);
        }
    }

    /// Replaces the tracked membership with exactly `members`.
    ///
    /// Missing ids are inserted as disconnected, eligible for cleanup
    /// starting now. Ids no longer listed are removed, closing their
    /// sessions first where connected. Already-present members are left
    /// untouched.
    pub async fn set_members(&self, members: &[M]) {
        let mut roster = self.shared.roster.write().await;
        let now = Instant::now();
        for member in members {
            if !roster.members.contains_key(member) {
                roster.members.insert(member.clone(), None);
                roster.last_seen.insert(member.clone(), now);
            }
        }
        let dropped: Vec<M> = roster
            .members
            .keys()
            .filter(|member| !members.contains(*member))
            .cloned()
            .collect();
        let mut to_close = Vec::new();
        for member in dropped {
            if let Some(Some(session)) = roster.members.get(&member) {
                to_close.push(session.clone());
            }
            self.forget(&mut roster, member);
        }
        drop(roster);
        for session in to_close {
            session.close().await;
        }
    }

    /// Stops the room: closes every live session, then cancels the loop.
    ///
    /// When this returns, every session transport is closed, both loops of
    /// every session have exited, and the event queue is closing; the room
    /// admits nobody afterwards.
    pub async fn stop(&self) {
        tracing::debug!(room = ?self.id(), "stopping");
        let sessions: Vec<SocketSession<M>> = {
            let roster = self.shared.roster.read().await;
            roster.members.values().flatten().cloned().collect()
        };
        for session in sessions {
            session.close().await;
        }
        self.shared.cancel.cancel();
        tracing::info!(room = ?self.id(), "stopped");
    }

    /// Removes `member` from both maps and schedules `on_remove`.
    fn forget(&self, roster: &mut Roster<M>, member: M) {
        roster.members.remove(&member);
        roster.last_seen.remove(&member);
        tracing::info!(room = ?self.id(), member = ?member, "member removed");
        self.shared.callbacks.remove(member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    use roomhub_transport::{MemoryPeer, MemoryTransport, PeerFrame};

    /// Records every callback invocation for later assertions.
    #[derive(Clone, Default)]
    struct Recorder {
        connects: Arc<StdMutex<Vec<String>>>,
        disconnects: Arc<StdMutex<Vec<String>>>,
        removes: Arc<StdMutex<Vec<String>>>,
        messages: Arc<StdMutex<Vec<(String, Vec<u8>)>>>,
    }

    impl Recorder {
        fn options(&self) -> RoomOptions<String> {
            let connects = Arc::clone(&self.connects);
            let disconnects = Arc::clone(&self.disconnects);
            let removes = Arc::clone(&self.removes);
            let messages = Arc::clone(&self.messages);
            RoomOptions::new()
                .on_connect(move |member| connects.lock().unwrap().push(member))
                .on_disconnect(move |member| disconnects.lock().unwrap().push(member))
                .on_remove(move |member| removes.lock().unwrap().push(member))
                .on_message(move |member, payload| {
                    messages.lock().unwrap().push((member, payload))
                })
        }

        fn connects(&self) -> Vec<String> {
            self.connects.lock().unwrap().clone()
        }

        fn disconnects(&self) -> Vec<String> {
            self.disconnects.lock().unwrap().clone()
        }

        fn removes(&self) -> Vec<String> {
            self.removes.lock().unwrap().clone()
        }
    }

    /// A room whose event loop is not running; operations that need the
    /// loop (disconnect processing) have their own setup below.
    fn detached_room(id: &str) -> (Room<String, String>, Recorder) {
        let recorder = Recorder::default();
        let room = Room::new(
            &CancellationToken::new(),
            id.to_string(),
            recorder.options(),
        );
        (room, recorder)
    }

    /// A room with its event loop running on a spawned task.
    fn running_room(id: &str) -> (Room<String, String>, Recorder) {
        let (room, recorder) = detached_room(id);
        tokio::spawn({
            let room = room.clone();
            async move { room.run().await }
        });
        (room, recorder)
    }

    async fn connect_member(room: &Room<String, String>, member: &str) -> MemoryPeer {
        let (transport, peer) = MemoryTransport::duplex();
        assert!(room.admit(transport, member.to_string()).await);
        peer
    }

    /// Seats a member as disconnected with an explicit last-seen instant.
    async fn insert_disconnected(
        room: &Room<String, String>,
        member: &str,
        seen: Instant,
    ) {
        let mut roster = room.shared.roster.write().await;
        roster.members.insert(member.to_string(), None);
        roster.last_seen.insert(member.to_string(), seen);
    }

    /// Polls `condition` until it holds; instant under the paused clock.
    async fn eventually(condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached in time");
    }

    /// Waits for the next binary frame on a peer, skipping keepalives.
    async fn next_binary(peer: &mut MemoryPeer) -> Vec<u8> {
        loop {
            match time::timeout(Duration::from_secs(1), peer.recv()).await {
                Ok(Some(PeerFrame::Binary(payload))) => return payload,
                Ok(Some(PeerFrame::Ping)) => continue,
                Ok(None) => panic!("transport closed while waiting for a frame"),
                Err(_) => panic!("no frame arrived within the timeout"),
            }
        }
    }

    /// Collects whatever binary frames remain once a peer's transport
    /// has been closed.
    async fn drain_binaries(peer: &mut MemoryPeer) -> Vec<Vec<u8>> {
        let mut binaries = Vec::new();
        while let Ok(Some(frame)) =
            time::timeout(Duration::from_millis(50), peer.recv()).await
        {
            if let PeerFrame::Binary(payload) = frame {
                binaries.push(payload);
            }
        }
        binaries
    }

    // =====================================================================
    // Construction and identity
    // =====================================================================

    #[tokio::test]
    async fn test_new_room_starts_open_and_empty() {
        let (room, recorder) = detached_room("r1");
        assert_eq!(room.id(), "r1");
        assert_eq!(room.status().await, RoomStatus::Open);
        assert!(room.presence().await.is_empty());
        assert_eq!(room.cleanup_period(), crate::DEFAULT_CLEANUP_PERIOD);
        assert!(recorder.connects().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_cleanup_period_is_honoured() {
        let room: Room<String, String> = Room::new(
            &CancellationToken::new(),
            "r1".to_string(),
            RoomOptions::new().cleanup_period(Duration::from_secs(1)),
        );
        assert_eq!(room.cleanup_period(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_set_room_id_before_start() {
        let (room, _) = detached_room("initial-id");
        room.set_room_id("new-id".to_string());
        assert_eq!(room.id(), "new-id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_room_id_ignored_after_start() {
        let (room, _) = running_room("initial-id");
        eventually(|| room.shared.started.load(Ordering::Acquire)).await;

        room.set_room_id("new-id".to_string());
        assert_eq!(room.id(), "initial-id");
        room.stop().await;
    }

    // =====================================================================
    // Admission: the status x membership table
    // =====================================================================

    #[tokio::test]
    async fn test_can_join_table() {
        for (status, unknown, disconnected, connected) in [
            (RoomStatus::Inactive, false, false, false),
            (RoomStatus::Open, true, true, false),
            (RoomStatus::Locked, false, true, false),
        ] {
            let (room, _) = detached_room("admission");
            let _peer = connect_member(&room, "connected").await;
            insert_disconnected(&room, "disconnected", Instant::now()).await;
            // Set the status directly so the Locked/Inactive purges don't
            // disturb the roster under test.
            room.shared.roster.write().await.status = status;

            assert_eq!(
                room.can_join(&"unknown".to_string()).await,
                unknown,
                "unknown member under {status}"
            );
            assert_eq!(
                room.can_join(&"disconnected".to_string()).await,
                disconnected,
                "disconnected member under {status}"
            );
            assert_eq!(
                room.can_join(&"connected".to_string()).await,
                connected,
                "connected member under {status}"
            );
        }
    }

    #[tokio::test]
    async fn test_register_recheck_rejects_duplicate_connection() {
        let (room, _) = detached_room("dup");
        let _peer = connect_member(&room, "alice").await;

        let (transport, _second_peer) = MemoryTransport::duplex();
        assert!(!room.admit(transport, "alice".to_string()).await);
        assert_eq!(room.presence().await.len(), 1);
    }

    // =====================================================================
    // Sends
    // =====================================================================

    #[tokio::test]
    async fn test_send_to_reaches_only_the_target() {
        let (room, _) = detached_room("sends");
        let mut peer_a = connect_member(&room, "a").await;
        let mut peer_b = connect_member(&room, "b").await;
        let mut peer_c = connect_member(&room, "c").await;

        room.send_to(&"a".to_string(), b"m".to_vec()).await;
        room.send_to(&"a".to_string(), b"m".to_vec()).await;
        room.send_to(&"b".to_string(), b"m".to_vec()).await;

        assert_eq!(next_binary(&mut peer_a).await, b"m");
        assert_eq!(next_binary(&mut peer_a).await, b"m");
        assert_eq!(next_binary(&mut peer_b).await, b"m");

        room.stop().await;
        assert_eq!(drain_binaries(&mut peer_a).await.len(), 0);
        assert_eq!(drain_binaries(&mut peer_b).await.len(), 0);
        assert_eq!(drain_binaries(&mut peer_c).await.len(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_or_disconnected_drops_silently() {
        let (room, _) = detached_room("sends");
        insert_disconnected(&room, "ghost", Instant::now()).await;

        room.send_to(&"ghost".to_string(), b"m".to_vec()).await;
        room.send_to(&"nobody".to_string(), b"m".to_vec()).await;
    }

    #[tokio::test]
    async fn test_send_all_skips_disconnected_members() {
        let (room, _) = detached_room("sends");
        let mut peer_a = connect_member(&room, "a").await;
        let mut peer_b = connect_member(&room, "b").await;
        insert_disconnected(&room, "ghost", Instant::now()).await;

        room.send_all(b"x".to_vec()).await;
        room.send_all(b"x".to_vec()).await;

        for peer in [&mut peer_a, &mut peer_b] {
            assert_eq!(next_binary(peer).await, b"x");
            assert_eq!(next_binary(peer).await, b"x");
        }

        room.stop().await;
        assert_eq!(drain_binaries(&mut peer_a).await.len(), 0);
        assert_eq!(drain_binaries(&mut peer_b).await.len(), 0);
    }

    // =====================================================================
    // Presence
    // =====================================================================

    #[tokio::test]
    async fn test_presence_snapshot_mixes_connected_and_disconnected() {
        let (room, _) = detached_room("presence");
        let _peer = connect_member(&room, "live").await;
        insert_disconnected(&room, "gone", Instant::now()).await;

        let mut presence = room.presence().await;
        presence.sort_by(|a, b| a.member.cmp(&b.member));

        assert_eq!(presence.len(), 2);
        assert_eq!(presence[0].member, "gone");
        assert!(!presence[0].is_connected);
        assert!(presence[0].last_seen.is_some());
        assert_eq!(presence[1].member, "live");
        assert!(presence[1].is_connected);
        assert!(presence[1].last_seen.is_none());
    }

    #[tokio::test]
    async fn test_member_presence_unknown_reads_as_never_seen() {
        let (room, _) = detached_room("presence");
        let presence = room.member_presence(&"nobody".to_string()).await;
        assert_eq!(presence.member, "nobody");
        assert!(!presence.is_connected);
        assert!(presence.last_seen.is_none());
    }

    // =====================================================================
    // Cleanup sweep
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_members_past_the_period() {
        // Give the paused clock room for backdated last-seen stamps.
        time::advance(Duration::from_secs(120)).await;
        let (room, recorder) = detached_room("cleanup");

        let offsets: [u64; 9] = [70, 60, 50, 40, 30, 20, 10, 5, 1];
        for offset in offsets {
            let member = format!("m{offset}");
            let seen = Instant::now() - Duration::from_secs(offset);
            insert_disconnected(&room, &member, seen).await;
        }

        room.clean_up_disconnected().await;

        // Strictly older than the 30 s default goes; 30 s exactly stays.
        let mut removed = recorder.removes();
        removed.sort();
        assert_eq!(removed, vec!["m40", "m50", "m60", "m70"]);
        assert_eq!(room.presence().await.len(), 5);
        let roster = room.shared.roster.read().await;
        assert_eq!(roster.last_seen.len(), roster.members.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_only_runs_while_open() {
        time::advance(Duration::from_secs(600)).await;
        let (room, recorder) = detached_room("cleanup");
        insert_disconnected(
            &room,
            "stale",
            Instant::now() - Duration::from_secs(300),
        )
        .await;
        room.shared.roster.write().await.status = RoomStatus::Locked;

        room.clean_up_disconnected().await;

        assert!(recorder.removes().is_empty());
        assert_eq!(room.presence().await.len(), 1);
    }

    // =====================================================================
    // Status transitions
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_locking_purges_disconnected_members() {
        let (room, recorder) = detached_room("lock");
        let _peer = connect_member(&room, "p1").await;
        insert_disconnected(&room, "p2", Instant::now()).await;

        room.set_status(RoomStatus::Locked).await;

        eventually(|| recorder.removes() == vec!["p2".to_string()]).await;
        let presence = room.presence().await;
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].member, "p1");

        assert!(!room.can_join(&"p2".to_string()).await, "purged member");
        assert!(!room.can_join(&"p3".to_string()).await, "unknown under lock");
        assert!(!room.can_join(&"p1".to_string()).await, "still connected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_allowed_when_locked_before_disconnect() {
        let (room, _) = running_room("lock");
        let mut peer = connect_member(&room, "p1").await;

        room.set_status(RoomStatus::Locked).await;
        peer.close();

        // p1 was still known when the lock landed, so the later
        // disconnect leaves them eligible to reconnect.
        let mut reconnectable = false;
        for _ in 0..500 {
            if room.can_join(&"p1".to_string()).await {
                reconnectable = true;
                break;
            }
            time::sleep(Duration::from_millis(1)).await;
        }
        assert!(reconnectable, "known member should reconnect under lock");
        room.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivating_ejects_everyone() {
        let (room, recorder) = detached_room("inactive");
        let mut peer = connect_member(&room, "live").await;
        insert_disconnected(&room, "gone", Instant::now()).await;

        room.set_status(RoomStatus::Inactive).await;

        eventually(|| recorder.removes().len() == 2).await;
        let mut removed = recorder.removes();
        removed.sort();
        assert_eq!(removed, vec!["gone", "live"]);
        assert!(room.presence().await.is_empty());
        // The ejected session's transport was closed.
        assert_eq!(drain_binaries(&mut peer).await.len(), 0);
        assert!(!room.can_join(&"anyone".to_string()).await);
    }

    #[tokio::test]
    async fn test_set_status_same_value_is_a_noop() {
        let (room, _) = detached_room("noop");
        insert_disconnected(&room, "gone", Instant::now()).await;

        room.set_status(RoomStatus::Open).await;
        assert_eq!(room.presence().await.len(), 1);
    }

    // =====================================================================
    // Membership replacement
    // =====================================================================

    #[tokio::test]
    async fn test_set_members_inserts_missing_as_disconnected() {
        let (room, _) = detached_room("roster");
        room.set_members(&["a".to_string(), "b".to_string()]).await;

        let presence = room.presence().await;
        assert_eq!(presence.len(), 2);
        assert!(presence.iter().all(|p| !p.is_connected));
        assert!(presence.iter().all(|p| p.last_seen.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_members_removes_unlisted_and_closes_sessions() {
        let (room, recorder) = detached_room("roster");
        let mut peer_a = connect_member(&room, "a").await;
        let _peer_b = connect_member(&room, "b").await;
        insert_disconnected(&room, "c", Instant::now()).await;

        room.set_members(&["b".to_string()]).await;

        eventually(|| recorder.removes().len() == 2).await;
        let mut removed = recorder.removes();
        removed.sort();
        assert_eq!(removed, vec!["a", "c"]);
        let presence = room.presence().await;
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].member, "b");
        // a's transport was closed along with its removal.
        assert_eq!(drain_binaries(&mut peer_a).await.len(), 0);
    }

    #[tokio::test]
    async fn test_set_members_keeps_existing_connections() {
        let (room, recorder) = detached_room("roster");
        let _peer = connect_member(&room, "a").await;

        room.set_members(&["a".to_string(), "b".to_string()]).await;

        assert!(recorder.removes().is_empty());
        let presence = room.member_presence(&"a".to_string()).await;
        assert!(presence.is_connected);
    }

    // =====================================================================
    // Stop
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_sessions_and_rejects_joins() {
        let (room, _) = running_room("stop");
        let mut peer = connect_member(&room, "a").await;

        room.stop().await;

        assert!(!room.can_join(&"a".to_string()).await);
        assert!(!room.can_join(&"newcomer".to_string()).await);
        // The session transport is closed; only pre-stop frames remain.
        assert_eq!(drain_binaries(&mut peer).await.len(), 0);

        // Late admissions are refused outright.
        let (transport, _late_peer) = MemoryTransport::duplex();
        assert!(!room.admit(transport, "late".to_string()).await);
    }
}

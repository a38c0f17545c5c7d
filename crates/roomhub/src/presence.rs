//! Presence snapshots reported by a room.

use tokio::time::Instant;

/// A point-in-time view of one member's connection state.
///
/// `last_seen` is populated exactly when the member is known but currently
/// disconnected; it records the moment the disconnect was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPresence<M> {
    /// The member this entry describes.
    pub member: M,
    /// Whether a live session is currently attached.
    pub is_connected: bool,
    /// When the member transitioned to disconnected, if they did.
    pub last_seen: Option<Instant>,
}

//! # roomhub
//!
//! A concurrent coordination primitive that multiplexes many persistent
//! bidirectional client sessions (WebSocket connections) into a single
//! logical "room" with lifecycle, presence tracking, broadcast, targeted
//! delivery, and graceful membership management.
//!
//! A [`Room`] owns a serialized event loop over its member map; each
//! connection gets a [`SocketSession`] bridging the transport to the room's
//! event queue. Application semantics live entirely in the callbacks
//! supplied through [`RoomOptions`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use roomhub::{CancellationToken, Room, RoomOptions};
//!
//! let cancel = CancellationToken::new();
//! let options = RoomOptions::new()
//!     .on_connect(|member: u64| println!("member {member} joined"))
//!     .on_message(|member: u64, payload| {
//!         println!("member {member} sent {} bytes", payload.len());
//!     });
//! let room = Room::new(&cancel, "lobby", options);
//!
//! // The event loop runs until the room is stopped or `cancel` fires.
//! tokio::spawn({
//!     let room = room.clone();
//!     async move { room.run().await }
//! });
//!
//! // Wire `room.handle_socket_with_member(...)` into an axum route to
//! // admit members, then drive them with `room.send_to` / `room.send_all`.
//! ```

mod error;
#[cfg(feature = "websocket")]
mod handler;
mod options;
mod presence;
mod room;
mod session;
mod status;

pub use error::JoinError;
pub use options::{MemberCallback, MessageCallback, RoomOptions, DEFAULT_CLEANUP_PERIOD};
pub use presence::MemberPresence;
pub use room::{MemberKey, Room, RoomKey};
pub use session::{EventSink, SessionEvent, SocketSession};
pub use status::RoomStatus;

// Rooms are cancellation-scoped; re-exported so embedders don't need a
// direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

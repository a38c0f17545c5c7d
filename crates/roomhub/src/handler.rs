//! HTTP upgrade glue: admit a pre-identified member over axum's WebSocket.
//!
//! The caller resolves a member id however it likes (auth middleware,
//! query string, session cookie) before handing the request over; the
//! handler only validates the identity, checks admission, and performs
//! the upgrade. Malformed upgrade requests never reach these methods:
//! axum's `WebSocketUpgrade` extractor rejects them first.

use axum::extract::ws::WebSocketUpgrade;
use axum::http::request::Parts;
use axum::response::Response;

use roomhub_transport::WebSocketTransport;

use crate::{JoinError, MemberKey, Room, RoomKey};

impl<R: RoomKey, M: MemberKey> Room<R, M> {
    /// Upgrades `ws` into a session for an already-resolved member.
    ///
    /// `None` means "no identity"; `on_error` maps a [`JoinError`] to the
    /// HTTP response sent instead of upgrading (pass
    /// `|e| e.into_response()` for the built-in 400/403 mapping).
    ///
    /// On success the response completes the handshake and the member is
    /// admitted inside the upgrade callback; `on_connect` fires shortly
    /// afterwards. The handler never blocks on application callbacks.
    pub async fn handle_socket_with_member<F>(
        &self,
        ws: WebSocketUpgrade,
        member: Option<M>,
        on_error: F,
    ) -> Response
    where
        F: FnOnce(JoinError) -> Response,
    {
        let Some(member) = member else {
            return on_error(JoinError::MissingMember);
        };
        if !self.can_join(&member).await {
            return on_error(JoinError::Rejected);
        }

        let room = self.clone();
        ws.on_upgrade(move |socket| async move {
            room.admit(WebSocketTransport::new(socket), member).await;
        })
    }

    /// Like [`Room::handle_socket_with_member`], resolving the member from
    /// the request parts.
    pub async fn handle_socket<G, F>(
        &self,
        ws: WebSocketUpgrade,
        parts: &Parts,
        resolve: G,
        on_error: F,
    ) -> Response
    where
        G: FnOnce(&Parts) -> Option<M>,
        F: FnOnce(JoinError) -> Response,
    {
        self.handle_socket_with_member(ws, resolve(parts), on_error)
            .await
    }
}

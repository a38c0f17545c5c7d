//! A minimal chat server built on roomhub.
//!
//! Clients connect with `GET /chat?username=<name>` (WebSocket upgrade)
//! and exchange JSON payloads of the form `{"text": "..."}`. Everything
//! the room learns (joins, leaves, chat lines) is fanned out to all
//! connected members; `GET /presence` shows who the room currently knows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use roomhub::{CancellationToken, Room, RoomOptions};

type UserId = u64;

/// Shared server state: the room handle plus a user-name registry.
///
/// The room is late-bound through a `OnceLock` because its callbacks
/// capture this struct.
struct ChatServer {
    room: OnceLock<Room<&'static str, UserId>>,
    users: Mutex<HashMap<UserId, String>>,
    next_user: AtomicU64,
}

/// The wire format fanned out to every member.
#[derive(Serialize)]
struct ChatEvent {
    kind: &'static str,
    user: UserId,
    name: String,
    text: String,
}

/// What clients send us.
#[derive(Deserialize)]
struct InboundChat {
    text: String,
}

impl ChatServer {
    fn new() -> Self {
        Self {
            room: OnceLock::new(),
            users: Mutex::new(HashMap::new()),
            next_user: AtomicU64::new(1),
        }
    }

    fn room(&self) -> &Room<&'static str, UserId> {
        self.room.get().expect("room is set before the server starts")
    }

    fn register_user(&self, name: String) -> UserId {
        let user = self.next_user.fetch_add(1, Ordering::Relaxed);
        self.users.lock().unwrap().insert(user, name);
        user
    }

    fn user_name(&self, user: UserId) -> Option<String> {
        self.users.lock().unwrap().get(&user).cloned()
    }

    fn broadcast(&self, event: ChatEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "failed to encode chat event");
                return;
            }
        };
        let room = self.room().clone();
        tokio::spawn(async move { room.send_all(payload).await });
    }

    fn on_connect(&self, user: UserId) {
        let name = self.user_name(user).unwrap_or_default();
        tracing::info!(user, %name, "user joined");
        self.broadcast(ChatEvent {
            kind: "joined",
            user,
            name: name.clone(),
            text: format!("{name} joined the chat"),
        });
    }

    fn on_disconnect(&self, user: UserId) {
        let name = self.user_name(user).unwrap_or_default();
        tracing::info!(user, %name, "user left");
        self.broadcast(ChatEvent {
            kind: "left",
            user,
            name: name.clone(),
            text: format!("{name} left the chat"),
        });
    }

    fn on_remove(&self, user: UserId) {
        self.users.lock().unwrap().remove(&user);
    }

    fn on_message(&self, user: UserId, payload: Vec<u8>) {
        let inbound: InboundChat = match serde_json::from_slice(&payload) {
            Ok(inbound) => inbound,
            Err(error) => {
                tracing::warn!(user, %error, "ignoring malformed chat payload");
                return;
            }
        };
        let name = self.user_name(user).unwrap_or_default();
        self.broadcast(ChatEvent {
            kind: "chat",
            user,
            name,
            text: inbound.text,
        });
    }
}

#[derive(Deserialize)]
struct ConnectQuery {
    username: Option<String>,
}

async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(server): State<Arc<ChatServer>>,
) -> Response {
    let member = query
        .username
        .filter(|name| !name.is_empty())
        .map(|name| server.register_user(name));
    server
        .room()
        .handle_socket_with_member(ws, member, |error| error.into_response())
        .await
}

#[derive(Serialize)]
struct PresenceEntry {
    user: UserId,
    name: Option<String>,
    connected: bool,
}

async fn presence_handler(
    State(server): State<Arc<ChatServer>>,
) -> Json<Vec<PresenceEntry>> {
    let entries = server
        .room()
        .presence()
        .await
        .into_iter()
        .map(|presence| PresenceEntry {
            user: presence.member,
            name: server.user_name(presence.member),
            connected: presence.is_connected,
        })
        .collect();
    Json(entries)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_demo=debug,roomhub=debug".into()),
        )
        .init();

    let cancel = CancellationToken::new();
    let server = Arc::new(ChatServer::new());

    let room = Room::new(&cancel, "lobby", {
        let connect = Arc::clone(&server);
        let disconnect = Arc::clone(&server);
        let remove = Arc::clone(&server);
        let message = Arc::clone(&server);
        RoomOptions::new()
            .on_connect(move |user| connect.on_connect(user))
            .on_disconnect(move |user| disconnect.on_disconnect(user))
            .on_remove(move |user| remove.on_remove(user))
            .on_message(move |user, payload| message.on_message(user, payload))
    });
    let _ = server.room.set(room.clone());

    tokio::spawn({
        let room = room.clone();
        async move { room.run().await }
    });

    let app = Router::new()
        .route("/chat", get(chat_handler))
        .route("/presence", get(presence_handler))
        .with_state(Arc::clone(&server));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:10101").await?;
    tracing::info!(addr = %listener.local_addr()?, "chat server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    room.stop().await;
    Ok(())
}

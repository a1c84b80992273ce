use async_trait::async_trait;
use mindroom_core::Message;

use crate::error::ChatError;
use crate::types::BotStatus;

/// Common interface implemented by every chat backend a bot can speak.
/// The bundled implementation ([`crate::matrix::MatrixClient`]) targets a
/// Matrix homeserver; the contract itself is backend-agnostic so a test
/// double can stand in for it without a live server.
///
/// Every method takes `&self` (not `&mut self`) so a single client can be
/// shared behind an `Arc` between the sync loop task and whichever
/// component (dispatch, reply pipeline) needs to send or edit concurrently.
/// Implementations own whatever interior mutability their session state
/// needs.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// The entity id (bot account) this client is logged in as.
    fn entity_id(&self) -> &str;

    /// `Start` — establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), ChatError>;

    /// `Stop` — gracefully close the connection.
    async fn disconnect(&self) -> Result<(), ChatError>;

    /// Pull the next batch of inbound events. Blocks (cooperatively) until
    /// at least one event is available or the long-poll window elapses,
    /// in which case it returns an empty `Vec`.
    async fn sync_once(&self) -> Result<Vec<Message>, ChatError>;

    /// `Send` — post a new message to a room. Returns the new event id.
    async fn send(&self, room_id: &str, body: &str) -> Result<String, ChatError>;

    /// `Edit` — revise a previously sent message in place.
    async fn edit(&self, room_id: &str, event_id: &str, new_body: &str) -> Result<(), ChatError>;

    /// `JoinRoom` — join a room by id.
    async fn join_room(&self, room_id: &str) -> Result<(), ChatError>;

    /// `LeaveRoom` — leave a room by id.
    async fn leave_room(&self, room_id: &str) -> Result<(), ChatError>;

    fn status(&self) -> BotStatus;
}

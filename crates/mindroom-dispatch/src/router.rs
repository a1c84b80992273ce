//! The router suggestion contract (spec.md §4.4's `Router.Suggest`).
//!
//! The router may invoke the LLM; that concrete, LLM-backed implementation
//! lives in `mindroom-agent` (the reply pipeline owns LLM access) and is
//! wired in here only behind this trait, mirroring how `mindroom-chat`
//! keeps `MatrixClient` behind the backend-agnostic `ChatClient` trait.

use async_trait::async_trait;
use mindroom_core::{Message, Room, Snapshot};

/// A pure-ish function over `(message, room, snapshot)` that names the one
/// entity best suited to answer, or none. Implementations may call an LLM;
/// the dispatch engine bounds every call with a timeout and never lets a
/// router failure propagate.
#[async_trait]
pub trait RouterSuggester: Send + Sync {
    async fn suggest(&self, message: &Message, room: &Room, snapshot: &Snapshot) -> Option<String>;
}

/// A suggester that never has an opinion. Useful as a default when no
/// LLM-backed router is wired up, and in tests that don't exercise rule 10.
pub struct NoOpRouter;

#[async_trait]
impl RouterSuggester for NoOpRouter {
    async fn suggest(&self, _message: &Message, _room: &Room, _snapshot: &Snapshot) -> Option<String> {
        None
    }
}

//! The concrete `Router.Suggest` implementation (spec.md §4.4's router
//! suggestion contract), wrapping an [`LlmProvider`] behind
//! `mindroom_dispatch::RouterSuggester`. Kept in this crate rather than
//! `mindroom-dispatch` so dispatch never depends on LLM access directly —
//! see `mindroom_dispatch::router` for the trait side of this split.

use std::sync::Arc;

use async_trait::async_trait;
use mindroom_core::{Message, Room, Snapshot};
use mindroom_dispatch::RouterSuggester;
use tracing::warn;

use crate::provider::{ChatMessage, ChatRequest, LlmProvider, Role};

pub struct LlmRouter {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl RouterSuggester for LlmRouter {
    async fn suggest(&self, message: &Message, room: &Room, snapshot: &Snapshot) -> Option<String> {
        let agents: Vec<&str> = snapshot
            .in_room(&room.id)
            .filter(|e| e.is_agent())
            .map(|e| e.id())
            .collect();
        if agents.is_empty() {
            return None;
        }

        let system = format!(
            "You route chat messages to the best-suited agent. Reply with exactly one agent id \
             from this list, or the single word 'none' if no agent fits: {}",
            agents.join(", ")
        );
        let req = ChatRequest {
            model: self.model.clone(),
            system,
            messages: vec![ChatMessage {
                role: Role::User,
                content: message.body.clone(),
            }],
            max_tokens: 32,
            tools: Vec::new(),
            raw_messages: None,
        };

        match self.provider.send(&req).await {
            Ok(resp) => {
                let candidate = resp.content.trim();
                agents
                    .into_iter()
                    .find(|id| *id == candidate)
                    .map(|id| id.to_string())
            }
            Err(err) => {
                warn!(%err, "router suggestion failed, falling back to no route");
                None
            }
        }
    }
}

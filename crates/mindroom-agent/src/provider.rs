//! The LLM backend contract (spec.md §6). Deliberately out of scope: the
//! pipeline talks only to this trait; the one bundled implementation
//! ([`crate::http_provider::HttpLlmProvider`]) is a reference, not the
//! product.
//!
//! Grounded on `skynet-agent::provider::LlmProvider` — same shape, trimmed
//! of prompt-caching tiers and extended-thinking levels that have no
//! counterpart here.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single message in the conversation history.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Tools exposed to the LLM. Empty when the entity has none bound.
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages for the tool loop; overrides `messages` when set,
    /// the same convention `skynet-agent::tools::tool_loop` uses to carry
    /// structured `tool_use`/`tool_result` content blocks.
    pub raw_messages: Option<Vec<serde_json::Value>>,
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Events emitted during a streaming chat call (spec.md §6's
/// `TextDelta | ToolCallStarted | ToolCallCompleted | Finish`). The
/// provider only ever emits `TextDelta`/`ToolCallStarted`/`Done`/`Error`;
/// "tool call completed" in the spec's vocabulary is realized by the
/// pipeline itself once it finishes executing the tool (the provider never
/// sees the result — the pipeline feeds it back on a continuation call).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCallStarted {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        stop_reason: String,
    },
    Error {
        message: String,
    },
}

/// Classification of a provider's authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    ApiKey,
    OAuth,
    None,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub token_type: TokenType,
    pub expires_at: Option<i64>,
    pub refreshable: bool,
}

/// Common interface for every LLM backend the reply pipeline can speak to.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Non-streaming call; used by the AI router (spec.md §4.4) and team
    /// member drafts (spec.md §4.5.2), both of which don't need incremental
    /// chat edits.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel. Default: falls back to
    /// `send`, emitting a single `TextDelta` followed by `Done`.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        for call in &resp.tool_calls {
            let _ = tx
                .send(StreamEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                })
                .await;
        }
        if !resp.content.is_empty() {
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: resp.content.clone(),
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }

    fn token_info(&self) -> Option<TokenInfo> {
        None
    }

    async fn refresh_auth(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// LLMTransient vs LLMFatal (spec.md §7): rate limits and transport
    /// hiccups are worth retrying; a malformed request or auth failure is
    /// not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_) | ProviderError::RateLimited { .. } | ProviderError::Unavailable(_)
        )
    }
}

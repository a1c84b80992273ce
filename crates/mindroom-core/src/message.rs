use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single chat event as seen by the dispatch engine and reply pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub event_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(default)]
    pub mentions: BTreeSet<String>,
    pub thread_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_edit: bool,
    /// When `is_edit` is set, the event id this message replaces.
    pub replaces: Option<String>,
    /// Set only on router-authored transcriptions of voice input: the id of
    /// the human the transcription speaks for. Dispatch treats such a
    /// message as if authored by this id rather than the router itself.
    #[serde(default)]
    pub transcribed_for: Option<String>,
}

impl Message {
    /// The thread a reply to this message belongs to: its own thread if it
    /// started one, otherwise a new thread rooted at this message.
    pub fn reply_thread_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.event_id)
    }

    /// The sender dispatch should reason about: `transcribed_for` when set,
    /// otherwise `sender_id`.
    pub fn effective_sender_id(&self) -> &str {
        self.transcribed_for.as_deref().unwrap_or(&self.sender_id)
    }
}

/// A derived view over a room's messages that share a thread id, ordered
/// oldest first. Threads are not persisted by this crate; they are built on
/// demand from whatever history source a caller provides.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

impl Thread {
    pub fn from_history(thread_id: &str, history: impl IntoIterator<Item = Message>) -> Self {
        let mut messages: Vec<Message> = history
            .into_iter()
            .filter(|m| m.reply_thread_id() == thread_id)
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Self {
            thread_id: thread_id.to_string(),
            messages,
        }
    }

    pub fn last_sender(&self) -> Option<&str> {
        self.messages.last().map(|m| m.sender_id.as_str())
    }
}

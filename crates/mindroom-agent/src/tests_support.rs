//! Shared test fixtures used across this crate's unit tests.
#![cfg(test)]

use mindroom_core::Message;

pub fn sample_message(event_id: &str, room_id: &str, body: &str) -> Message {
    Message {
        event_id: event_id.to_string(),
        room_id: room_id.to_string(),
        sender_id: "user-1".to_string(),
        body: body.to_string(),
        mentions: Default::default(),
        thread_id: None,
        timestamp: chrono::Utc::now(),
        is_edit: false,
        replaces: None,
        transcribed_for: None,
    }
}

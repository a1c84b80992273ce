//! The bundled chat client adapter: talks to a Matrix homeserver's
//! client-server HTTP API (`/sync`, `/rooms/{id}/send`, `/join`, `/leave`).
//! This is the one concrete [`ChatClient`] this crate ships; federation
//! (server-to-server) machinery is explicitly out of scope — everything
//! here is a plain authenticated HTTP call, the same shape as the
//! teacher's `anthropic`/`openai` provider adapters.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mindroom_core::Message;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::error::{ChatError, Result};
use crate::types::{BotCredentials, BotStatus};

const SYNC_TIMEOUT_MS: u64 = 30_000;

pub struct MatrixClient {
    http: Client,
    credentials: BotCredentials,
    since: Mutex<Option<String>>,
    status: Mutex<BotStatus>,
}

impl MatrixClient {
    pub fn new(credentials: BotCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(SYNC_TIMEOUT_MS + 10_000))
            .build()
            .map_err(|e| ChatError::ConfigError(e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            since: Mutex::new(None),
            status: Mutex::new(BotStatus::Disconnected),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.homeserver.trim_end_matches('/'), path)
    }

    fn set_status(&self, status: BotStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl ChatClient for MatrixClient {
    fn entity_id(&self) -> &str {
        &self.credentials.entity_id
    }

    async fn connect(&self) -> Result<()> {
        self.set_status(BotStatus::Connecting);
        let resp = self
            .http
            .get(self.url("/_matrix/client/v3/account/whoami"))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| ChatError::ConnectionFailed(e.to_string()))?;

        if resp.status().is_success() {
            self.set_status(BotStatus::Connected);
            Ok(())
        } else if resp.status().as_u16() == 401 {
            self.set_status(BotStatus::Error("unauthorized".to_string()));
            Err(ChatError::AuthFailed(format!(
                "homeserver rejected the access token for {}",
                self.credentials.user_id
            )))
        } else {
            let status = resp.status();
            self.set_status(BotStatus::Error(status.to_string()));
            Err(ChatError::ConnectionFailed(format!(
                "whoami returned {status}"
            )))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_status(BotStatus::Disconnected);
        Ok(())
    }

    async fn sync_once(&self) -> Result<Vec<Message>> {
        let since = self.since.lock().unwrap().clone();
        let mut req = self
            .http
            .get(self.url("/_matrix/client/v3/sync"))
            .bearer_auth(&self.credentials.access_token)
            .query(&[("timeout", SYNC_TIMEOUT_MS.to_string())]);
        if let Some(token) = &since {
            req = req.query(&[("since", token.as_str())]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ChatError::ConnectionFailed(format!(
                "sync returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;

        if let Some(next) = body.get("next_batch").and_then(|v| v.as_str()) {
            *self.since.lock().unwrap() = Some(next.to_string());
        }

        Ok(parse_sync_messages(&body))
    }

    async fn send(&self, room_id: &str, body: &str) -> Result<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let resp = self
            .http
            .put(self.url(&format!(
                "/_matrix/client/v3/rooms/{room_id}/send/m.room.message/{txn_id}"
            )))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({ "msgtype": "m.text", "body": body }))
            .send()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChatError::SendFailed(format!(
                "send returned {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        body.get("event_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChatError::SendFailed("response missing event_id".to_string()))
    }

    async fn edit(&self, room_id: &str, event_id: &str, new_body: &str) -> Result<()> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let resp = self
            .http
            .put(self.url(&format!(
                "/_matrix/client/v3/rooms/{room_id}/send/m.room.message/{txn_id}"
            )))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({
                "msgtype": "m.text",
                "body": format!("* {new_body}"),
                "m.new_content": { "msgtype": "m.text", "body": new_body },
                "m.relates_to": { "rel_type": "m.replace", "event_id": event_id },
            }))
            .send()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChatError::SendFailed(format!(
                "edit returned {}",
                resp.status()
            )))
        }
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/_matrix/client/v3/join/{room_id}")))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChatError::SendFailed(format!(
                "join returned {}",
                resp.status()
            )))
        }
    }

    async fn leave_room(&self, room_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/_matrix/client/v3/rooms/{room_id}/leave")))
            .bearer_auth(&self.credentials.access_token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChatError::SendFailed(format!(
                "leave returned {}",
                resp.status()
            )))
        }
    }

    fn status(&self) -> BotStatus {
        self.status.lock().unwrap().clone()
    }
}

/// Flatten `/sync`'s nested `rooms.join.{roomId}.timeline.events` shape into
/// the crate's own [`Message`] type. Unrecognized event types are skipped.
fn parse_sync_messages(body: &serde_json::Value) -> Vec<Message> {
    let mut out = Vec::new();
    let Some(joined) = body
        .get("rooms")
        .and_then(|r| r.get("join"))
        .and_then(|j| j.as_object())
    else {
        return out;
    };

    for (room_id, room) in joined {
        let Some(events) = room
            .get("timeline")
            .and_then(|t| t.get("events"))
            .and_then(|e| e.as_array())
        else {
            continue;
        };
        for event in events {
            match message_from_event(room_id, event) {
                Some(message) => out.push(message),
                None => debug!(room_id = %room_id, "skipping non-text or malformed timeline event"),
            }
        }
    }
    out
}

fn message_from_event(room_id: &str, event: &serde_json::Value) -> Option<Message> {
    if event.get("type").and_then(|v| v.as_str()) != Some("m.room.message") {
        return None;
    }
    let event_id = event.get("event_id")?.as_str()?.to_string();
    let sender_id = event.get("sender")?.as_str()?.to_string();
    let content = event.get("content")?;
    let body = content.get("body")?.as_str()?.to_string();
    let origin_server_ts = event.get("origin_server_ts").and_then(|v| v.as_i64()).unwrap_or(0);
    let timestamp = chrono::DateTime::from_timestamp_millis(origin_server_ts).unwrap_or_else(chrono::Utc::now);

    let relates_to = content.get("m.relates_to");
    let is_edit = relates_to
        .and_then(|r| r.get("rel_type"))
        .and_then(|v| v.as_str())
        == Some("m.replace");
    let replaces = relates_to
        .and_then(|r| r.get("event_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let thread_id = relates_to
        .filter(|r| r.get("rel_type").and_then(|v| v.as_str()) == Some("m.thread"))
        .and_then(|r| r.get("event_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let body = if is_edit {
        content
            .get("m.new_content")
            .and_then(|c| c.get("body"))
            .and_then(|v| v.as_str())
            .unwrap_or(&body)
            .to_string()
    } else {
        body
    };

    let mentions = event
        .get("content")
        .and_then(|c| c.get("m.mentions"))
        .and_then(|m| m.get("user_ids"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if body.trim().is_empty() {
        warn!(room_id = %room_id, event_id = %event_id, "empty message body");
    }

    Some(Message {
        event_id,
        room_id: room_id.to_string(),
        sender_id,
        body,
        mentions,
        thread_id,
        timestamp,
        is_edit,
        replaces,
        transcribed_for: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_text_message() {
        let body = json!({
            "rooms": {
                "join": {
                    "!room:example.org": {
                        "timeline": {
                            "events": [{
                                "type": "m.room.message",
                                "event_id": "$abc",
                                "sender": "@alice:example.org",
                                "origin_server_ts": 1_700_000_000_000i64,
                                "content": { "msgtype": "m.text", "body": "hello" }
                            }]
                        }
                    }
                }
            }
        });
        let messages = parse_sync_messages(&body);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "hello");
        assert_eq!(messages[0].room_id, "!room:example.org");
        assert!(!messages[0].is_edit);
    }

    #[test]
    fn parses_an_edit_via_m_replace() {
        let body = json!({
            "rooms": {
                "join": {
                    "!room:example.org": {
                        "timeline": {
                            "events": [{
                                "type": "m.room.message",
                                "event_id": "$def",
                                "sender": "@alice:example.org",
                                "origin_server_ts": 1_700_000_000_000i64,
                                "content": {
                                    "msgtype": "m.text",
                                    "body": "* corrected",
                                    "m.new_content": { "msgtype": "m.text", "body": "corrected" },
                                    "m.relates_to": { "rel_type": "m.replace", "event_id": "$abc" }
                                }
                            }]
                        }
                    }
                }
            }
        });
        let messages = parse_sync_messages(&body);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_edit);
        assert_eq!(messages[0].body, "corrected");
        assert_eq!(messages[0].replaces.as_deref(), Some("$abc"));
    }

    #[test]
    fn ignores_non_message_events() {
        let body = json!({
            "rooms": {
                "join": {
                    "!room:example.org": {
                        "timeline": {
                            "events": [{ "type": "m.room.member", "event_id": "$xyz" }]
                        }
                    }
                }
            }
        });
        assert!(parse_sync_messages(&body).is_empty());
    }
}

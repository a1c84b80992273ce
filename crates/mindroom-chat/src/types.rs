use serde::{Deserialize, Serialize};

/// Runtime connection state of a bot's chat client, surfaced to the
/// Lifecycle Supervisor for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Long-lived login material for one bot account, persisted per entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotCredentials {
    pub entity_id: String,
    pub homeserver: String,
    pub user_id: String,
    pub access_token: String,
}

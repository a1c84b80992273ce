pub mod background;
pub mod backpressure;
pub mod pipeline_runner;
pub mod supervisor;

use std::sync::Arc;

use mindroom_chat::{BotCredentials, ChatClient, CredentialStore, MatrixClient};
use mindroom_core::Entity;
use tracing::warn;

use crate::supervisor::BotFactory;

/// The bundled `BotFactory`: loads cached session credentials for the
/// entity and wraps them in a `MatrixClient`. An entity with no cached
/// credentials yet gets a blank-session client that will fail to connect
/// until an operator runs the bootstrap login flow — intentionally a hard
/// failure rather than a silent no-op bot, per spec.md §7's `ChatFatal`
/// exit-2 policy.
pub struct MatrixBotFactory {
    credentials: CredentialStore,
    default_homeserver: String,
}

impl MatrixBotFactory {
    pub fn new(credentials_dir: impl Into<std::path::PathBuf>, default_homeserver: impl Into<String>) -> Self {
        Self {
            credentials: CredentialStore::new(credentials_dir),
            default_homeserver: default_homeserver.into(),
        }
    }
}

impl BotFactory for MatrixBotFactory {
    fn build(&self, entity: &Entity) -> Arc<dyn ChatClient> {
        let entity_id = entity.id().to_string();
        let creds = match self.credentials.load(&entity_id) {
            Ok(Some(creds)) => creds,
            Ok(None) => {
                warn!(entity_id, "no cached session, bot will need a fresh login");
                BotCredentials {
                    entity_id: entity_id.clone(),
                    homeserver: self.default_homeserver.clone(),
                    user_id: format!("@{entity_id}:{}", self.default_homeserver),
                    access_token: String::new(),
                }
            }
            Err(err) => {
                warn!(entity_id, %err, "failed to load cached session");
                BotCredentials {
                    entity_id: entity_id.clone(),
                    homeserver: self.default_homeserver.clone(),
                    user_id: format!("@{entity_id}:{}", self.default_homeserver),
                    access_token: String::new(),
                }
            }
        };
        match MatrixClient::new(creds) {
            Ok(client) => Arc::new(client),
            Err(err) => panic!("failed to construct matrix client for {entity_id}: {err}"),
        }
    }
}

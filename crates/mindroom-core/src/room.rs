use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A chat room (Matrix room, in the bundled chat adapter) known to the
/// orchestrator. Membership includes both entity ids and human user ids;
/// the dispatch engine tells the two apart via the Entity Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub members: BTreeSet<String>,
    /// Overrides an entity's own `model_ref` for replies sent in this room.
    pub model_ref: Option<String>,
}

impl Room {
    pub fn human_members<'a, 'b>(&'a self, entity_ids: &'b BTreeSet<String>) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.members
            .iter()
            .filter(move |m| !entity_ids.contains(*m))
            .map(String::as_str)
    }
}

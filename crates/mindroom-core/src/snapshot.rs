//! The validated, immutable view of a configuration document. A `Snapshot`
//! is the unit the Entity Registry swaps in atomically on reload; once
//! built it never changes.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ConfigDocument, DefaultsConfig, RawKnowledgeBase, RawModel, RawTool};
use crate::entity::{Entity, EntityCommon, LearningMode};
use crate::error::ConfigError;
use crate::room::Room;

#[derive(Debug, Clone)]
pub struct Snapshot {
    entities: BTreeMap<String, Entity>,
    rooms: BTreeMap<String, Room>,
    bot_accounts: BTreeSet<String>,
    models: BTreeMap<String, RawModel>,
    tools: BTreeMap<String, RawTool>,
    knowledge_bases: BTreeMap<String, RawKnowledgeBase>,
    defaults: DefaultsConfig,
    router_id: String,
    /// Opaque content fingerprint used by the watcher to detect changes
    /// without re-parsing and re-validating on every poll tick.
    fingerprint: String,
}

impl Snapshot {
    /// Validate and assemble a document into a snapshot, collecting every
    /// cross-reference violation instead of stopping at the first one.
    pub fn build(doc: ConfigDocument, fingerprint: String) -> crate::Result<Self> {
        let mut errors = Vec::new();
        let mut entities: BTreeMap<String, Entity> = BTreeMap::new();

        let known_rooms: BTreeSet<String> = doc.rooms.iter().map(|r| r.id.clone()).collect();
        let known_models: BTreeSet<String> = doc.models.iter().map(|m| m.id.clone()).collect();
        let known_tools: BTreeSet<String> = doc.tools.iter().map(|t| t.id.clone()).collect();
        let known_kbs: BTreeSet<String> = doc.knowledge_bases.iter().map(|k| k.id.clone()).collect();

        let mut insert_entity = |id: String, entity: Entity, errors: &mut Vec<String>| {
            if entities.contains_key(&id) {
                errors.push(format!("duplicate entity id: {id}"));
                return;
            }
            entities.insert(id, entity);
        };

        for agent in &doc.agents {
            check_refs(
                &agent.id,
                &agent.rooms,
                agent.model_ref.as_deref(),
                &agent.tool_ids,
                &agent.knowledge_base_ids,
                &known_rooms,
                &known_models,
                &known_tools,
                &known_kbs,
                &mut errors,
            );
            let common = EntityCommon {
                id: agent.id.clone(),
                display_name: agent.display_name.clone(),
                rooms: agent.rooms.iter().cloned().collect(),
                model_ref: agent.model_ref.clone().or_else(|| doc.defaults.model_ref.clone()),
                tool_ids: agent.tool_ids.clone(),
                knowledge_base_ids: agent.knowledge_base_ids.clone(),
                instructions: agent.instructions.clone(),
                num_history_runs: agent
                    .num_history_runs
                    .or(doc.defaults.num_history_runs)
                    .unwrap_or(10),
                learning_mode: agent.learning_mode.unwrap_or(LearningMode::OnDemand),
            };
            insert_entity(agent.id.clone(), Entity::Agent(common), &mut errors);
        }

        let known_agent_ids: BTreeSet<String> = doc.agents.iter().map(|a| a.id.clone()).collect();

        for team in &doc.teams {
            check_refs(
                &team.id,
                &team.rooms,
                team.model_ref.as_deref(),
                &team.tool_ids,
                &team.knowledge_base_ids,
                &known_rooms,
                &known_models,
                &known_tools,
                &known_kbs,
                &mut errors,
            );
            if team.agents.is_empty() {
                errors.push(format!("team '{}' has no member agents", team.id));
            }
            for member in &team.agents {
                if !known_agent_ids.contains(member) {
                    errors.push(format!(
                        "team '{}' references unknown agent '{}'",
                        team.id, member
                    ));
                }
            }
            let common = EntityCommon {
                id: team.id.clone(),
                display_name: team.display_name.clone(),
                rooms: team.rooms.iter().cloned().collect(),
                model_ref: team.model_ref.clone().or_else(|| doc.defaults.model_ref.clone()),
                tool_ids: team.tool_ids.clone(),
                knowledge_base_ids: team.knowledge_base_ids.clone(),
                instructions: team.instructions.clone(),
                num_history_runs: team
                    .num_history_runs
                    .or(doc.defaults.num_history_runs)
                    .unwrap_or(10),
                learning_mode: team.learning_mode.unwrap_or(LearningMode::OnDemand),
            };
            insert_entity(
                team.id.clone(),
                Entity::Team {
                    common,
                    agents: team.agents.clone(),
                    mode: team.mode,
                },
                &mut errors,
            );
        }

        for room_id in &doc.router.rooms {
            if !known_rooms.contains(room_id) {
                errors.push(format!(
                    "router references unknown room '{room_id}'"
                ));
            }
        }
        let router_common = EntityCommon {
            id: doc.router.id.clone(),
            display_name: doc.router.display_name.clone(),
            rooms: doc.router.rooms.iter().cloned().collect(),
            model_ref: doc.router.model_ref.clone().or_else(|| doc.defaults.model_ref.clone()),
            tool_ids: Vec::new(),
            knowledge_base_ids: Vec::new(),
            instructions: doc.router.instructions.clone(),
            num_history_runs: doc.defaults.num_history_runs.unwrap_or(10),
            learning_mode: LearningMode::Never,
        };
        let router_id = doc.router.id.clone();
        insert_entity(router_id.clone(), Entity::Router(router_common), &mut errors);

        // Exactly one router is guaranteed by construction (there is only
        // one `doc.router` field); what we must still catch is an agent or
        // team id colliding with it, which `insert_entity` already reports.

        let rooms: BTreeMap<String, Room> = doc
            .rooms
            .into_iter()
            .map(|r| {
                (
                    r.id.clone(),
                    Room {
                        id: r.id,
                        display_name: r.display_name,
                        members: r.members.into_iter().collect(),
                        model_ref: r.model_ref,
                    },
                )
            })
            .collect();

        let models = doc.models.into_iter().map(|m| (m.id.clone(), m)).collect();
        let tools = doc.tools.into_iter().map(|t| (t.id.clone(), t)).collect();
        let knowledge_bases = doc
            .knowledge_bases
            .into_iter()
            .map(|k| (k.id.clone(), k))
            .collect();

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(Self {
            entities,
            rooms,
            bot_accounts: doc.bot_accounts.into_iter().collect(),
            models,
            tools,
            knowledge_bases,
            defaults: doc.defaults,
            router_id,
            fingerprint,
        })
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn router(&self) -> &Entity {
        self.entities
            .get(&self.router_id)
            .expect("snapshot invariant: router entity always present")
    }

    pub fn all_agents(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.is_agent())
    }

    pub fn teams(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.is_team())
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn in_room<'a>(&'a self, room_id: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.entities
            .values()
            .filter(move |e| e.rooms().contains(room_id))
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn is_bot_account(&self, id: &str) -> bool {
        self.bot_accounts.contains(id)
    }

    pub fn model(&self, id: &str) -> Option<&RawModel> {
        self.models.get(id)
    }

    /// Every configured model, for callers that need to provision a
    /// provider per distinct `provider` id up front (the orchestrator's
    /// boot sequence).
    pub fn models(&self) -> impl Iterator<Item = &RawModel> {
        self.models.values()
    }

    pub fn tool(&self, id: &str) -> Option<&RawTool> {
        self.tools.get(id)
    }

    pub fn knowledge_base(&self, id: &str) -> Option<&RawKnowledgeBase> {
        self.knowledge_bases.get(id)
    }

    pub fn defaults(&self) -> &DefaultsConfig {
        &self.defaults
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entity_ids(&self) -> BTreeSet<String> {
        self.entities.keys().cloned().collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn check_refs(
    entity_id: &str,
    rooms: &[String],
    model_ref: Option<&str>,
    tool_ids: &[String],
    kb_ids: &[String],
    known_rooms: &BTreeSet<String>,
    known_models: &BTreeSet<String>,
    known_tools: &BTreeSet<String>,
    known_kbs: &BTreeSet<String>,
    errors: &mut Vec<String>,
) {
    for room_id in rooms {
        if !known_rooms.contains(room_id) {
            errors.push(format!(
                "entity '{entity_id}' references unknown room '{room_id}'"
            ));
        }
    }
    if let Some(model_ref) = model_ref {
        if !known_models.contains(model_ref) {
            errors.push(format!(
                "entity '{entity_id}' references unknown model '{model_ref}'"
            ));
        }
    }
    for tool_id in tool_ids {
        if !known_tools.contains(tool_id) {
            errors.push(format!(
                "entity '{entity_id}' references unknown tool '{tool_id}'"
            ));
        }
    }
    for kb_id in kb_ids {
        if !known_kbs.contains(kb_id) {
            errors.push(format!(
                "entity '{entity_id}' references unknown knowledge base '{kb_id}'"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDocument;

    fn minimal_doc() -> &'static str {
        r#"
        [router]
        id = "router"
        display_name = "Router"

        [[agents]]
        id = "agent-a"
        display_name = "Agent A"
        rooms = ["room-1"]

        [[rooms]]
        id = "room-1"
        "#
    }

    #[test]
    fn builds_a_valid_snapshot() {
        let doc = ConfigDocument::parse(minimal_doc()).unwrap();
        let snap = Snapshot::build(doc, "fp-1".to_string()).unwrap();
        assert!(snap.entity("agent-a").unwrap().is_agent());
        assert!(snap.router().is_router());
        assert_eq!(snap.in_room("room-1").count(), 1);
    }

    #[test]
    fn rejects_unknown_room_reference() {
        let bad = r#"
        [router]
        id = "router"

        [[agents]]
        id = "agent-a"
        display_name = "Agent A"
        rooms = ["ghost-room"]
        "#;
        let doc = ConfigDocument::parse(bad).unwrap();
        let err = Snapshot::build(doc, "fp-1".to_string()).unwrap_err();
        match err {
            ConfigError::Invalid(msgs) => {
                assert!(msgs.iter().any(|m| m.contains("ghost-room")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_entity_ids() {
        let bad = r#"
        [router]
        id = "router"

        [[agents]]
        id = "dup"
        display_name = "A"

        [[teams]]
        id = "dup"
        display_name = "T"
        agents = ["dup"]
        mode = "collaborate"
        "#;
        let doc = ConfigDocument::parse(bad).unwrap();
        let err = Snapshot::build(doc, "fp-1".to_string()).unwrap_err();
        match err {
            ConfigError::Invalid(msgs) => {
                assert!(msgs.iter().any(|m| m.contains("duplicate entity id")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_team_with_no_members() {
        let bad = r#"
        [router]
        id = "router"

        [[teams]]
        id = "team-a"
        display_name = "T"
        agents = []
        mode = "consensus"
        "#;
        let doc = ConfigDocument::parse(bad).unwrap();
        let err = Snapshot::build(doc, "fp-1".to_string()).unwrap_err();
        match err {
            ConfigError::Invalid(msgs) => {
                assert!(msgs.iter().any(|m| m.contains("no member agents")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tool_reference() {
        let bad = r#"
        [router]
        id = "router"

        [[agents]]
        id = "agent-a"
        display_name = "A"
        tool_ids = ["ghost-tool"]
        "#;
        let doc = ConfigDocument::parse(bad).unwrap();
        let err = Snapshot::build(doc, "fp-1".to_string()).unwrap_err();
        match err {
            ConfigError::Invalid(msgs) => {
                assert!(msgs.iter().any(|m| m.contains("ghost-tool")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}

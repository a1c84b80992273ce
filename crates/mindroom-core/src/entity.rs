use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Governs whether an agent updates its memory store after a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Always,
    #[default]
    OnDemand,
    Never,
}

/// How a team's member agents reach a single reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamMode {
    /// Every member drafts independently; a synthesis pass merges the drafts.
    Collaborate,
    /// Members vote; the majority (or first) answer is sent.
    Consensus,
}

/// Fields shared by every entity kind, regardless of whether it is an
/// Agent, a Team, or the Router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCommon {
    pub id: String,
    pub display_name: String,
    pub rooms: BTreeSet<String>,
    pub model_ref: Option<String>,
    #[serde(default)]
    pub tool_ids: Vec<String>,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    pub instructions: Option<String>,
    #[serde(default = "default_history_runs")]
    pub num_history_runs: u32,
    #[serde(default)]
    pub learning_mode: LearningMode,
}

fn default_history_runs() -> u32 {
    10
}

/// A named participant in the orchestrator: a single LLM-backed Agent, a
/// Team of agents, or the one Router that exists in every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    Agent(EntityCommon),
    Team {
        common: EntityCommon,
        /// Non-empty subset of known agent ids, validated at snapshot assembly.
        agents: Vec<String>,
        mode: TeamMode,
    },
    Router(EntityCommon),
}

impl Entity {
    pub fn common(&self) -> &EntityCommon {
        match self {
            Entity::Agent(c) => c,
            Entity::Team { common, .. } => common,
            Entity::Router(c) => c,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn rooms(&self) -> &BTreeSet<String> {
        &self.common().rooms
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Entity::Agent(_))
    }

    pub fn is_team(&self) -> bool {
        matches!(self, Entity::Team { .. })
    }

    pub fn is_router(&self) -> bool {
        matches!(self, Entity::Router(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Agent(_) => "agent",
            Entity::Team { .. } => "team",
            Entity::Router(_) => "router",
        }
    }
}

//! The on-disk configuration document: agents, teams, the router, rooms,
//! and the handful of cross-cutting defaults every entity inherits unless
//! it sets its own. `Load()` parses and validates a document into a
//! [`crate::Snapshot`]; this module owns only the raw, unvalidated shape.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::entity::{LearningMode, TeamMode};

/// Env var prefix for overrides, e.g. `MINDROOM_DEFAULTS__NUM_HISTORY_RUNS=5`.
pub const ENV_PREFIX: &str = "MINDROOM_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub agents: Vec<RawAgent>,
    #[serde(default)]
    pub teams: Vec<RawTeam>,
    pub router: RawRouter,
    #[serde(default)]
    pub rooms: Vec<RawRoom>,
    #[serde(default)]
    pub models: Vec<RawModel>,
    #[serde(default)]
    pub tools: Vec<RawTool>,
    #[serde(default)]
    pub knowledge_bases: Vec<RawKnowledgeBase>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub bot_accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAgent {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub rooms: Vec<String>,
    pub model_ref: Option<String>,
    #[serde(default)]
    pub tool_ids: Vec<String>,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    pub instructions: Option<String>,
    pub num_history_runs: Option<u32>,
    pub learning_mode: Option<LearningMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTeam {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub rooms: Vec<String>,
    pub model_ref: Option<String>,
    #[serde(default)]
    pub tool_ids: Vec<String>,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    pub instructions: Option<String>,
    pub num_history_runs: Option<u32>,
    pub learning_mode: Option<LearningMode>,
    pub agents: Vec<String>,
    pub mode: TeamMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRouter {
    #[serde(default = "default_router_id")]
    pub id: String,
    #[serde(default = "default_router_display_name")]
    pub display_name: String,
    #[serde(default)]
    pub rooms: Vec<String>,
    pub model_ref: Option<String>,
    pub instructions: Option<String>,
}

fn default_router_id() -> String {
    "router".to_string()
}

fn default_router_display_name() -> String {
    "Router".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRoom {
    pub id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    pub model_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawModel {
    pub id: String,
    pub provider: String,
    pub model_id: String,
    pub api_base: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTool {
    pub id: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawKnowledgeBase {
    pub id: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
        }
    }
}

fn default_memory_backend() -> String {
    "in_memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    pub model_ref: Option<String>,
    pub num_history_runs: Option<u32>,
}

impl ConfigDocument {
    /// Parse a document from a TOML file with `MINDROOM_`-prefixed env
    /// overrides layered on top, mirroring the teacher's `SkynetConfig::load`.
    pub fn load(path: &str) -> crate::Result<Self> {
        let doc: ConfigDocument = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| crate::ConfigError::Parse(e.to_string()))?;
        Ok(doc)
    }

    /// Parse a document directly from a TOML string, bypassing the file
    /// system and env overrides. Used by tests and by callers that already
    /// hold the document contents (e.g. the watcher, after reading a file).
    pub fn parse(toml_src: &str) -> crate::Result<Self> {
        toml::from_str(toml_src).map_err(|e| crate::ConfigError::Parse(e.to_string()))
    }
}

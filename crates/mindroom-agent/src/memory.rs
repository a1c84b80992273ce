//! The memory contract (spec.md §6): recall/commit scoped by
//! `(agent, room, team)`. Non-goal: persistent durable storage is an
//! external collaborator; this crate ships only an in-memory reference
//! implementation.
//!
//! Grounded on `skynet-agent::tools::knowledge`'s `ctx.memory().knowledge_search`/
//! `knowledge_write` access pattern — same recall-before-answer,
//! commit-after-answer shape, generalized from a SQLite FTS5 table to a
//! trait so the pipeline never depends on a specific store.

use async_trait::async_trait;
use dashmap::DashMap;

/// Identifies which memory partition a recall/commit applies to. Distinct
/// agents never see each other's memory unless they share a team scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryScope {
    pub agent_id: String,
    pub room_id: String,
    pub team_id: Option<String>,
}

impl MemoryScope {
    pub fn new(agent_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            room_id: room_id.into(),
            team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub key: String,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory backend unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator contract for durable recall. The reply pipeline
/// calls `recall` while gathering context and `commit` once a reply
/// finishes successfully (spec.md §4.5.1 steps 1 and 9).
#[async_trait]
pub trait Memory: Send + Sync {
    async fn recall(&self, scope: &MemoryScope, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError>;
    async fn commit(&self, scope: &MemoryScope, key: &str, content: &str) -> Result<(), MemoryError>;
}

/// In-memory reference implementation: a per-scope append log, substring
/// matched on recall. Good enough for tests and small deployments; a real
/// deployment plugs in its own durable `Memory`.
#[derive(Default)]
pub struct InMemoryMemory {
    entries: DashMap<MemoryScope, Vec<MemoryEntry>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn recall(&self, scope: &MemoryScope, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let needle = query.to_lowercase();
        let matches = self
            .entries
            .get(scope)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| needle.is_empty() || e.content.to_lowercase().contains(&needle))
                    .rev()
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    async fn commit(&self, scope: &MemoryScope, key: &str, content: &str) -> Result<(), MemoryError> {
        self.entries
            .entry(scope.clone())
            .or_default()
            .push(MemoryEntry {
                key: key.to_string(),
                content: content.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_then_recall_roundtrips() {
        let memory = InMemoryMemory::new();
        let scope = MemoryScope::new("agent-1", "room-1");
        memory.commit(&scope, "turn-1", "the user prefers dark mode").await.unwrap();
        let found = memory.recall(&scope, "dark mode", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "turn-1");
    }

    #[tokio::test]
    async fn recall_is_scoped_per_agent_and_room() {
        let memory = InMemoryMemory::new();
        let a = MemoryScope::new("agent-1", "room-1");
        let b = MemoryScope::new("agent-2", "room-1");
        memory.commit(&a, "turn-1", "secret").await.unwrap();
        let found = memory.recall(&b, "secret", 5).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn recall_respects_limit() {
        let memory = InMemoryMemory::new();
        let scope = MemoryScope::new("agent-1", "room-1");
        for i in 0..10 {
            memory.commit(&scope, &format!("turn-{i}"), "note").await.unwrap();
        }
        let found = memory.recall(&scope, "note", 3).await.unwrap();
        assert_eq!(found.len(), 3);
    }
}

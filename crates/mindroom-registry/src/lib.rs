//! The Entity Registry: a lock-free, copy-on-write view of the current
//! [`mindroom_core::Snapshot`]. Readers (the dispatch engine, the reply
//! pipeline) never block each other or a writer; the Lifecycle Supervisor
//! publishes a brand new snapshot on every reload.

use std::sync::Arc;

use arc_swap::ArcSwap;
use mindroom_core::{Entity, Snapshot};
use tracing::info;

/// Shared handle to the live snapshot. Cloning is cheap (one `Arc` bump);
/// every clone sees the same underlying `ArcSwap`.
#[derive(Clone)]
pub struct EntityRegistry {
    current: Arc<ArcSwap<Snapshot>>,
}

impl EntityRegistry {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Atomically replace the live snapshot. Readers already holding a
    /// `Guard` from before the swap keep reading the old snapshot; there is
    /// no torn-read window.
    pub fn publish(&self, snapshot: Snapshot) {
        info!(
            fingerprint = %snapshot.fingerprint(),
            "publishing new entity registry snapshot"
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Borrow the current snapshot for the duration of a lock-free read.
    /// Callers that need to outlive the guard should call `snapshot()`
    /// instead to get an owned `Arc`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// `Get` — look up a single entity by id (spec.md §4.2).
    #[tracing::instrument(skip(self))]
    pub fn get(&self, id: &str) -> Option<Entity> {
        self.snapshot().entity(id).cloned()
    }

    /// `AllAgents` — every Agent entity in the current snapshot.
    pub fn all_agents(&self) -> Vec<Entity> {
        self.snapshot().all_agents().cloned().collect()
    }

    /// `Router` — the single Router entity, always present.
    pub fn router(&self) -> Entity {
        self.snapshot().router().clone()
    }

    /// `Teams` — every Team entity in the current snapshot.
    pub fn teams(&self) -> Vec<Entity> {
        self.snapshot().teams().cloned().collect()
    }

    /// `InRoom` — every entity (Agent, Team, or Router) whose room set
    /// contains `room_id`.
    #[tracing::instrument(skip(self))]
    pub fn in_room(&self, room_id: &str) -> Vec<Entity> {
        self.snapshot().in_room(room_id).cloned().collect()
    }

    pub fn is_bot_account(&self, id: &str) -> bool {
        self.snapshot().is_bot_account(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindroom_core::config::ConfigDocument;

    fn snapshot(src: &str) -> Snapshot {
        let doc = ConfigDocument::parse(src).unwrap();
        Snapshot::build(doc, "fp".to_string()).unwrap()
    }

    #[test]
    fn get_and_router_resolve_from_the_published_snapshot() {
        let registry = EntityRegistry::new(snapshot(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            rooms = ["room-1"]

            [[rooms]]
            id = "room-1"
            "#,
        ));

        assert!(registry.get("agent-a").unwrap().is_agent());
        assert!(registry.router().is_router());
        assert_eq!(registry.in_room("room-1").len(), 1);
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn publish_swaps_readers_onto_the_new_snapshot() {
        let registry = EntityRegistry::new(snapshot(
            r#"
            [router]
            id = "router"
            "#,
        ));
        assert!(registry.get("agent-a").is_none());

        registry.publish(snapshot(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            "#,
        ));

        assert!(registry.get("agent-a").unwrap().is_agent());
    }

    #[test]
    fn a_snapshot_held_before_publish_is_unaffected_by_a_later_publish() {
        let registry = EntityRegistry::new(snapshot(
            r#"
            [router]
            id = "router"
            "#,
        ));
        let held = registry.snapshot();

        registry.publish(snapshot(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            "#,
        ));

        assert!(held.entity("agent-a").is_none());
        assert!(registry.snapshot().entity("agent-a").is_some());
    }
}

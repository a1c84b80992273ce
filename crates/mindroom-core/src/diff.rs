//! Computes what changed between two snapshots so the Lifecycle Supervisor
//! can start, stop, or reconfigure only the entities that actually moved.

use crate::entity::Entity;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Classify every entity id present in `old` or `new` as added, removed, or
/// changed (by value-equality of the full `Entity`, not just its id).
pub fn compute_diff(old: &Snapshot, new: &Snapshot) -> SnapshotDiff {
    let old_ids = old.entity_ids();
    let new_ids = new.entity_ids();

    let added = new_ids.difference(&old_ids).cloned().collect();
    let removed = old_ids.difference(&new_ids).cloned().collect();

    let changed = old_ids
        .intersection(&new_ids)
        .filter(|id| {
            let old_entity = old.entity(id);
            let new_entity = new.entity(id);
            !entities_equal(old_entity, new_entity)
        })
        .cloned()
        .collect();

    SnapshotDiff {
        added,
        removed,
        changed,
    }
}

fn entities_equal(a: Option<&Entity>, b: Option<&Entity>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDocument;

    fn build(src: &str) -> Snapshot {
        let doc = ConfigDocument::parse(src).unwrap();
        Snapshot::build(doc, "fp".to_string()).unwrap()
    }

    #[test]
    fn detects_added_and_removed() {
        let old = build(
            r#"
            [router]
            id = "router"
            "#,
        );
        let new = build(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            "#,
        );
        let diff = compute_diff(&old, &new);
        assert_eq!(diff.added, vec!["agent-a".to_string()]);
        assert!(diff.removed.is_empty());
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn detects_changed() {
        let old = build(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            "#,
        );
        let new = build(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A renamed"
            "#,
        );
        let diff = compute_diff(&old, &new);
        assert_eq!(diff.changed, vec!["agent-a".to_string()]);
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let a = build(
            r#"
            [router]
            id = "router"
            "#,
        );
        let b = build(
            r#"
            [router]
            id = "router"
            "#,
        );
        assert!(compute_diff(&a, &b).is_empty());
    }
}

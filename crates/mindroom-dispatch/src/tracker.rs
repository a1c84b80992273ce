//! Idempotency ledger keyed by `(event_id, entity_id)`.
//!
//! Grounded on two teacher patterns: `skynet-agent::health::HealthTracker`'s
//! `DashMap` for lock-free concurrent reads, and
//! `skynet-users::resolver::UserResolver`'s bounded cache (insertion-order
//! eviction, "drop the oldest half when full" instead of a full LRU crate).

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use mindroom_core::constants::RESPONSE_TRACKER_CAPACITY;

/// Process-wide set of `(event_id, entity_id)` pairs that have already been
/// handled, or are in flight, to prevent duplicate replies.
pub struct ResponseTracker {
    entries: DashMap<String, Vec<String>>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self::with_capacity(RESPONSE_TRACKER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// `ResponseTracker.contains(event_id, *)` — has *any* entity already
    /// been marked for this event?
    pub fn contains_any(&self, event_id: &str) -> bool {
        self.entries.contains_key(event_id)
    }

    /// `ResponseTracker.contains(event_id, entity_id)`.
    pub fn contains(&self, event_id: &str, entity_id: &str) -> bool {
        self.entries
            .get(event_id)
            .map(|v| v.iter().any(|e| e == entity_id))
            .unwrap_or(false)
    }

    /// `ResponseTracker.Mark(event_id, entity_id)`. Idempotent: marking the
    /// same pair twice has no extra effect.
    pub fn mark(&self, event_id: &str, entity_id: &str) {
        let mut is_new_event = false;
        self.entries
            .entry(event_id.to_string())
            .and_modify(|entities| {
                if !entities.iter().any(|e| e == entity_id) {
                    entities.push(entity_id.to_string());
                }
            })
            .or_insert_with(|| {
                is_new_event = true;
                vec![entity_id.to_string()]
            });

        if is_new_event {
            let mut order = self.order.lock().unwrap();
            order.push_back(event_id.to_string());
            if order.len() > self.capacity {
                let evict_count = self.capacity / 2;
                for _ in 0..evict_count {
                    if let Some(old) = order.pop_front() {
                        self.entries.remove(&old);
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

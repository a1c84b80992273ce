//! Per-thread handle for cancelling the active `ReplyTask`.
//!
//! Grounded on `mindroom-chat::runtime::BotRuntime`'s use of
//! `tokio_util::sync::CancellationToken` for cooperative cancellation, and
//! `skynet-agent::health::HealthTracker`'s `DashMap` for the lock-free map.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Maps `thread_id -> handle of the currently running ReplyTask`, if any.
pub struct StopManager {
    active: DashMap<String, CancellationToken>,
}

impl Default for StopManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StopManager {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    /// Register the token that will cancel the ReplyTask now running in
    /// `thread_id`. Replaces (without cancelling) whatever was registered
    /// before — the reply pipeline is expected to clear its own entry on
    /// completion before a new one is registered.
    pub fn register(&self, thread_id: &str, token: CancellationToken) {
        self.active.insert(thread_id.to_string(), token);
    }

    /// `StopManager.Get(thread_id)` equivalent, driving a `!stop` command:
    /// cancel the active task in this thread, if any. Returns whether a
    /// task was found and cancelled.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.active.remove(thread_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the entry for a thread whose ReplyTask finished normally
    /// (spec.md §4.5.1 step 9 cleanup).
    pub fn clear(&self, thread_id: &str) {
        self.active.remove(thread_id);
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        self.active.contains_key(thread_id)
    }

    /// `StopManager.CancelAll()` — used by graceful shutdown.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_cancels_the_registered_token_and_clears_it() {
        let manager = StopManager::new();
        let token = CancellationToken::new();
        manager.register("thread-1", token.clone());
        assert!(manager.is_active("thread-1"));
        assert!(manager.cancel("thread-1"));
        assert!(token.is_cancelled());
        assert!(!manager.is_active("thread-1"));
    }

    #[test]
    fn cancel_on_unknown_thread_is_a_no_op() {
        let manager = StopManager::new();
        assert!(!manager.cancel("nope"));
    }

    #[test]
    fn cancel_all_cancels_every_active_token() {
        let manager = StopManager::new();
        let (a, b) = (CancellationToken::new(), CancellationToken::new());
        manager.register("t1", a.clone());
        manager.register("t2", b.clone());
        manager.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(!manager.is_active("t1"));
    }
}

//! Polls the configuration source for changes and rebuilds a [`Snapshot`]
//! when its content actually moves. Ticking and shutdown follow the same
//! `tokio::select!` against a `watch::Receiver<bool>` shape used by every
//! other long-lived loop in this workspace.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ConfigDocument;
use crate::constants::CONFIG_WATCH_POLL_MS;
use crate::snapshot::Snapshot;

fn fingerprint(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Load and validate the document at `path`, returning a snapshot stamped
/// with its content fingerprint.
pub fn load(path: &str) -> crate::Result<Snapshot> {
    let content = std::fs::read_to_string(path)?;
    let doc = ConfigDocument::parse(&content)?;
    Snapshot::build(doc, fingerprint(&content))
}

pub struct ConfigWatcher {
    path: String,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Poll the configuration source once a second. Calls `on_change` with
    /// a freshly built snapshot whenever the content fingerprint differs
    /// from the last one observed. A document that fails to parse or
    /// validate is logged and skipped; the previous good snapshot (held by
    /// the caller, not this watcher) stays in effect until a later poll
    /// succeeds.
    pub async fn watch<F>(&self, mut last_fingerprint: String, mut on_change: F, mut shutdown: watch::Receiver<bool>)
    where
        F: FnMut(Snapshot) + Send,
    {
        let mut interval = tokio::time::interval(Duration::from_millis(CONFIG_WATCH_POLL_MS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_once(&last_fingerprint) {
                        Ok(Some(snapshot)) => {
                            last_fingerprint = snapshot.fingerprint().to_string();
                            info!(path = %self.path, fingerprint = %last_fingerprint, "configuration changed");
                            on_change(snapshot);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(path = %self.path, error = %e, "configuration reload failed; keeping previous snapshot");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(path = %self.path, "config watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn poll_once(&self, last_fingerprint: &str) -> crate::Result<Option<Snapshot>> {
        let content = std::fs::read_to_string(&self.path)?;
        let fp = fingerprint(&content);
        if fp == last_fingerprint {
            return Ok(None);
        }
        let doc = ConfigDocument::parse(&content)?;
        Ok(Some(Snapshot::build(doc, fp)?))
    }
}

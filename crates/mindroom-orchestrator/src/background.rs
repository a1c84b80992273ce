//! Background tasks started at the end of boot (spec.md §4.6 step 5): the
//! config watcher driving hot reload, and the scheduled-message sweeper
//! that fulfills `!schedule` (spec.md §6) by actually sending due messages.
//!
//! Both follow `mindroom_core::watcher::ConfigWatcher`'s
//! `tokio::select!`-against-a-`watch::Receiver<bool>` shutdown shape.

use std::sync::Arc;
use std::time::Duration;

use mindroom_chat::ChatClient;
use mindroom_core::constants::DEGRADED_RETRY_MS;
use mindroom_core::watcher::ConfigWatcher;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::pipeline_runner::RuntimeContext;
use crate::supervisor::Supervisor;

const SCHEDULE_SWEEP_INTERVAL_MS: u64 = 1_000;

pub fn spawn_config_watcher(
    config_path: String,
    supervisor: Arc<Supervisor>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let fingerprint = supervisor.registry().snapshot().fingerprint().to_string();
        let watcher = ConfigWatcher::new(config_path);
        watcher
            .watch(
                fingerprint,
                move |snapshot| {
                    let supervisor = supervisor.clone();
                    tokio::spawn(async move { supervisor.reload(snapshot).await });
                },
                shutdown,
            )
            .await;
    })
}

/// Polls the scheduler for due messages and sends them through the chat
/// client the reply pipeline already holds (any bot account can post a
/// scheduled message; the router's client is used since it's always
/// present).
pub fn spawn_schedule_sweeper(
    chat: Arc<dyn ChatClient>,
    runtime_ctx: Arc<RuntimeContext>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(SCHEDULE_SWEEP_INTERVAL_MS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for due in runtime_ctx.scheduler.take_due() {
                        if let Err(err) = chat.send(&due.room_id, &due.text).await {
                            warn!(%err, schedule_id = due.id, "failed to send scheduled message");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("schedule sweeper shutting down");
                        return;
                    }
                }
            }
        }
    })
}

/// Retries bringup for any entity marked degraded by a failed boot attempt
/// (spec.md §7 ChatFatal), every `DEGRADED_RETRY_MS`.
pub fn spawn_degraded_retry_loop(
    supervisor: Arc<Supervisor>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(DEGRADED_RETRY_MS));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    supervisor.retry_degraded().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("degraded retry loop shutting down");
                        return;
                    }
                }
            }
        }
    })
}

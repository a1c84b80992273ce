//! The Lifecycle Supervisor (spec.md §4.6): boots bots from a snapshot,
//! hot-reloads them on config change via `compute_diff`, and drives a
//! graceful shutdown. Mirrors `mindroom_chat::runtime::BotRuntime`'s
//! connect/sync/reconnect idiom one level up — where `BotRuntime` owns one
//! bot's connection, `Supervisor` owns the whole fleet and reacts to
//! `SnapshotDiff`s the way the teacher's `skynet-gateway` main loop reacts
//! to `/stop` (cancel-everything-then-report), generalized to a
//! diff-driven start/stop/reconfigure cycle spec.md §4.6 describes and the
//! teacher has no direct precedent for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mindroom_chat::runtime::BotRuntime;
use mindroom_chat::ChatClient;
use mindroom_core::constants::SHUTDOWN_DEADLINE_MS;
use mindroom_core::{diff::compute_diff, Entity, Message, Snapshot};
use mindroom_dispatch::{DispatchEngine, Decision, ResponseTracker, StopManager};
use mindroom_registry::EntityRegistry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::pipeline_runner::{dispatch_and_run, RuntimeContext};

/// Builds the `ChatClient` a given entity's bot should use. The
/// orchestrator supplies the real factory (credentials lookup +
/// `MatrixClient::new`); tests supply a stub.
pub trait BotFactory: Send + Sync {
    fn build(&self, entity: &Entity) -> Arc<dyn ChatClient>;
}

pub struct Supervisor {
    registry: Arc<EntityRegistry>,
    bots: DashMap<String, BotRuntime>,
    /// Entities whose last bringup attempt failed fatally (spec.md §7
    /// ChatFatal): never made it into `bots`, retried on a timer by
    /// [`Supervisor::retry_degraded`] rather than on every reload.
    boot_degraded: DashMap<String, ()>,
    /// In-flight per-message dispatch tasks, tracked so `shutdown()` can
    /// join or abort them before returning (I4: no chat sends/edits once
    /// shutdown has returned).
    inflight: DashMap<u64, JoinHandle<()>>,
    next_inflight_id: AtomicU64,
    bot_factory: Arc<dyn BotFactory>,
    dispatch: Arc<DispatchEngine>,
    tracker: Arc<ResponseTracker>,
    stop_manager: Arc<StopManager>,
    inbound_tx: mpsc::Sender<(String, Message)>,
}

impl Supervisor {
    pub fn new(
        initial: Snapshot,
        bot_factory: Arc<dyn BotFactory>,
        dispatch: Arc<DispatchEngine>,
        inbound_tx: mpsc::Sender<(String, Message)>,
    ) -> Self {
        Self {
            registry: Arc::new(EntityRegistry::new(initial)),
            bots: DashMap::new(),
            boot_degraded: DashMap::new(),
            inflight: DashMap::new(),
            next_inflight_id: AtomicU64::new(0),
            bot_factory,
            dispatch,
            tracker: Arc::new(ResponseTracker::new()),
            stop_manager: Arc::new(StopManager::new()),
            inbound_tx,
        }
    }

    pub fn registry(&self) -> Arc<EntityRegistry> {
        self.registry.clone()
    }

    pub fn stop_manager(&self) -> Arc<StopManager> {
        self.stop_manager.clone()
    }

    pub fn tracker(&self) -> Arc<ResponseTracker> {
        self.tracker.clone()
    }

    /// Boot sequence steps 2-4 (step 1, loading the snapshot, already
    /// happened before `Supervisor::new`): router first, then agents, then
    /// teams — teams have no bot of their own, so only router/agent
    /// entities actually start one.
    pub async fn boot(&self) {
        let snapshot = self.registry.snapshot();
        let router = snapshot.router();
        self.start_entity(router).await;
        for agent in snapshot.all_agents() {
            self.start_entity(agent).await;
        }
        self.reconcile_rooms(&snapshot).await;
    }

    /// ChatFatal handling (spec.md §7): a bot whose bringup fails is
    /// marked degraded here rather than in `bots` at all; [`retry_degraded`]
    /// picks it back up every `DEGRADED_RETRY_MS`.
    async fn start_entity(&self, entity: &Entity) {
        if entity.is_team() {
            return;
        }
        let client = self.bot_factory.build(entity);
        let runtime = BotRuntime::new(client);
        if let Err(err) = runtime.start(self.inbound_tx_for(entity.id())).await {
            warn!(entity_id = entity.id(), %err, "failed to start bot; marking degraded, will retry bringup periodically");
            self.boot_degraded.insert(entity.id().to_string(), ());
            return;
        }
        self.boot_degraded.remove(entity.id());
        self.bots.insert(entity.id().to_string(), runtime);
        info!(entity_id = entity.id(), "bot started");
    }

    /// Whether `entity_id` is degraded, either because its last bringup
    /// attempt failed fatally or because its sync task exhausted its fault
    /// restart budget (spec.md §7 ChatFatal / Internal).
    pub fn is_degraded(&self, entity_id: &str) -> bool {
        self.boot_degraded.contains_key(entity_id) || self.bots.get(entity_id).map(|r| r.is_degraded()).unwrap_or(false)
    }

    /// Retries bringup for every entity marked degraded by a failed boot
    /// attempt. Intended to be driven on a `DEGRADED_RETRY_MS` timer by
    /// [`crate::background::spawn_degraded_retry_loop`].
    pub async fn retry_degraded(&self) {
        let ids: Vec<String> = self.boot_degraded.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        let snapshot = self.registry.snapshot();
        for id in ids {
            if let Some(entity) = snapshot.entity(&id) {
                info!(entity_id = %id, "retrying bringup for degraded bot");
                self.start_entity(entity).await;
            }
        }
    }

    fn inbound_tx_for(&self, entity_id: &str) -> mpsc::Sender<Message> {
        let (tx, mut rx) = mpsc::channel::<Message>(128);
        let inbound_tx = self.inbound_tx.clone();
        let entity_id = entity_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if inbound_tx.send((entity_id.clone(), message)).await.is_err() {
                    break;
                }
            }
        });
        tx
    }

    async fn stop_entity(&self, entity_id: &str) {
        if let Some((_, runtime)) = self.bots.remove(entity_id) {
            if let Err(err) = tokio::time::timeout(Duration::from_secs(5), runtime.stop()).await {
                warn!(entity_id, ?err, "bot stop timed out");
            }
        }
    }

    async fn reconcile_rooms(&self, snapshot: &Snapshot) {
        for entity in snapshot.entities() {
            if let Some(runtime) = self.bots.get(entity.id()) {
                for room_id in entity.rooms() {
                    if let Err(err) = runtime.join_room(room_id).await {
                        warn!(entity_id = entity.id(), room_id, %err, "failed to join room");
                    }
                }
            }
        }
    }

    /// Hot reload (spec.md §4.6): stop/destroy changed+removed entities,
    /// start added+changed ones, leave everything else's in-flight
    /// `ReplyTask`s untouched (I5) — we simply never call `stop_entity` on
    /// an id outside the diff.
    pub async fn reload(&self, new_snapshot: Snapshot) {
        let old_snapshot = self.registry.snapshot();
        let diff = compute_diff(&old_snapshot, &new_snapshot);
        if diff.is_empty() {
            return;
        }
        info!(added = diff.added.len(), removed = diff.removed.len(), changed = diff.changed.len(), "reloading");

        for id in diff.changed.iter().chain(diff.removed.iter()) {
            self.stop_entity(id).await;
        }

        self.registry.publish(new_snapshot);
        let snapshot = self.registry.snapshot();

        for id in diff.added.iter().chain(diff.changed.iter()) {
            if let Some(entity) = snapshot.entity(id) {
                self.start_entity(entity).await;
            }
        }
        self.reconcile_rooms(&snapshot).await;
    }

    /// Graceful shutdown (spec.md §4.6): signal every bot, cancel every
    /// outstanding `ReplyTask`, wait up to `SHUTDOWN_DEADLINE_MS`, then
    /// proceed regardless. Per I4, no chat send/edit may happen once this
    /// returns, so every in-flight per-message dispatch task tracked via
    /// [`spawn_dispatch`] is joined (or, past the deadline, aborted) before
    /// we return.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.stop_manager.cancel_all();
        let ids: Vec<String> = self.bots.iter().map(|e| e.key().clone()).collect();
        let stop_all = async {
            for id in ids {
                self.stop_entity(&id).await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_DEADLINE_MS), stop_all)
            .await
            .is_err()
        {
            warn!("shutdown deadline exceeded; exiting anyway");
        }

        let ids: Vec<u64> = self.inflight.iter().map(|e| *e.key()).collect();
        let handles: Vec<JoinHandle<()>> = ids.into_iter().filter_map(|id| self.inflight.remove(&id).map(|(_, h)| h)).collect();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "waiting for in-flight dispatch tasks to finish");
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(Duration::from_millis(SHUTDOWN_DEADLINE_MS), join_all).await.is_err() {
            warn!("in-flight dispatch tasks still running past shutdown deadline; aborting");
            for abort_handle in abort_handles {
                abort_handle.abort();
            }
        }
    }

    pub fn dispatch(&self) -> Arc<DispatchEngine> {
        self.dispatch.clone()
    }

    /// The running chat client for `entity_id`, if its bot started
    /// successfully. Used by the main loop to find a client that can send
    /// command responses and scheduled messages outside the reply
    /// pipeline.
    pub fn chat_client(&self, entity_id: &str) -> Option<Arc<dyn ChatClient>> {
        self.bots.get(entity_id).map(|runtime| runtime.client())
    }

    /// Spawns one inbound message's dispatch as a tracked task, so
    /// `shutdown()` can join or abort it instead of leaving it detached
    /// (I4: no chat sends/edits once shutdown has returned). The caller
    /// (the inbound loop in `main.rs`) should use this instead of a bare
    /// `tokio::spawn`.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        runtime_ctx: Arc<RuntimeContext>,
        receiving_bot_id: String,
        message: Message,
        thread_history: Vec<Message>,
    ) {
        let id = self.next_inflight_id.fetch_add(1, Ordering::SeqCst);
        let supervisor = self.clone();
        let handle = tokio::spawn(async move {
            handle_inbound(&supervisor, runtime_ctx, &receiving_bot_id, message, thread_history).await;
            supervisor.inflight.remove(&id);
        });
        self.inflight.insert(id, handle);
    }
}

/// Dispatches one inbound message on behalf of `receiving_bot_id` and
/// drives whatever reply work the decision implies. Split out of
/// `Supervisor` so it can run concurrently per message without borrowing
/// the supervisor mutably.
pub async fn handle_inbound(
    supervisor: &Supervisor,
    runtime_ctx: Arc<RuntimeContext>,
    receiving_bot_id: &str,
    message: Message,
    thread_history: Vec<Message>,
) {
    let snapshot = supervisor.registry().snapshot();
    let decision = supervisor
        .dispatch()
        .decide(&message, &thread_history, &supervisor.registry(), &supervisor.tracker(), receiving_bot_id)
        .await;

    match decision {
        Decision::Ignore => {}
        Decision::RouterCommand | Decision::HandleWith(_) | Decision::HandleWithTeam(_, _) => {
            dispatch_and_run(&runtime_ctx, &snapshot, &message, &thread_history, decision).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindroom_chat::error::Result as ChatResult;
    use mindroom_chat::types::BotStatus;
    use mindroom_core::config::ConfigDocument;
    use mindroom_dispatch::NoOpRouter;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubClient {
        entity_id: String,
        connected: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ChatClient for StubClient {
        fn entity_id(&self) -> &str {
            &self.entity_id
        }
        async fn connect(&self) -> ChatResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> ChatResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn sync_once(&self) -> ChatResult<Vec<Message>> {
            std::future::pending::<()>().await;
            Ok(Vec::new())
        }
        async fn send(&self, _room_id: &str, _body: &str) -> ChatResult<String> {
            Ok("evt".to_string())
        }
        async fn edit(&self, _room_id: &str, _event_id: &str, _new_body: &str) -> ChatResult<()> {
            Ok(())
        }
        async fn join_room(&self, _room_id: &str) -> ChatResult<()> {
            Ok(())
        }
        async fn leave_room(&self, _room_id: &str) -> ChatResult<()> {
            Ok(())
        }
        fn status(&self) -> BotStatus {
            if self.connected.load(Ordering::SeqCst) {
                BotStatus::Connected
            } else {
                BotStatus::Disconnected
            }
        }
    }

    struct StubFactory;

    impl BotFactory for StubFactory {
        fn build(&self, entity: &Entity) -> Arc<dyn ChatClient> {
            Arc::new(StubClient {
                entity_id: entity.id().to_string(),
                connected: AtomicBool::new(false),
            })
        }
    }

    fn snapshot(src: &str) -> Snapshot {
        let doc = ConfigDocument::parse(src).unwrap();
        Snapshot::build(doc, "fp".to_string()).unwrap()
    }

    fn make_supervisor(initial: Snapshot) -> (Supervisor, mpsc::Receiver<(String, Message)>) {
        let (tx, rx) = mpsc::channel(64);
        let dispatch = Arc::new(DispatchEngine::new(Arc::new(NoOpRouter)));
        (Supervisor::new(initial, Arc::new(StubFactory), dispatch, tx), rx)
    }

    const TWO_AGENTS: &str = r#"
        [router]
        id = "router"

        [[agents]]
        id = "agent-a"
        display_name = "A"
        rooms = ["room-1"]

        [[agents]]
        id = "agent-b"
        display_name = "B"
        rooms = ["room-1"]

        [[rooms]]
        id = "room-1"
        members = ["agent-a", "agent-b", "router", "human"]
    "#;

    #[tokio::test]
    async fn boot_starts_router_and_every_agent() {
        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        supervisor.boot().await;
        assert!(supervisor.chat_client("router").is_some());
        assert!(supervisor.chat_client("agent-a").is_some());
        assert!(supervisor.chat_client("agent-b").is_some());
    }

    #[tokio::test]
    async fn reload_removing_an_entity_stops_only_that_bot() {
        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        supervisor.boot().await;

        let reduced = snapshot(
            r#"
            [router]
            id = "router"

            [[agents]]
            id = "agent-a"
            display_name = "A"
            rooms = ["room-1"]

            [[rooms]]
            id = "room-1"
            members = ["agent-a", "router", "human"]
            "#,
        );
        supervisor.reload(reduced).await;

        assert!(supervisor.chat_client("agent-a").is_some());
        assert!(supervisor.chat_client("agent-b").is_none());
        assert!(supervisor.chat_client("router").is_some());
    }

    #[tokio::test]
    async fn reload_with_no_diff_is_a_no_op() {
        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        supervisor.boot().await;
        let before = supervisor.chat_client("agent-a").unwrap();

        supervisor.reload(snapshot(TWO_AGENTS)).await;

        let after = supervisor.chat_client("agent-a").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn shutdown_clears_every_bot() {
        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        supervisor.boot().await;
        supervisor.shutdown().await;
        assert!(supervisor.chat_client("agent-a").is_none());
        assert!(supervisor.chat_client("router").is_none());
    }

    // I4: "after orchestrator.Stop() returns, no further chat sends/edits
    // occur." A dispatch task still running when shutdown() is called must
    // finish (or be aborted at the deadline) before shutdown() returns, so
    // it can never touch the chat client afterward.
    #[tokio::test]
    async fn shutdown_waits_for_an_in_flight_dispatch_task_to_finish() {
        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        supervisor.inflight.insert(0, handle);

        supervisor.shutdown().await;

        assert!(finished.load(Ordering::SeqCst), "shutdown returned before the in-flight task completed");
        assert!(supervisor.inflight.is_empty());
    }

    #[tokio::test]
    async fn spawn_dispatch_is_tracked_and_drained_by_shutdown() {
        use mindroom_agent::{InMemoryMemory, InviteRegistry, PipelineContext, ProviderRegistry, Scheduler, ToolRegistry};
        use mindroom_core::Message;
        use std::collections::BTreeSet;

        let (supervisor, _rx) = make_supervisor(snapshot(TWO_AGENTS));
        supervisor.boot().await;
        let supervisor = Arc::new(supervisor);
        let chat = supervisor.chat_client("router").unwrap();

        let runtime_ctx = Arc::new(RuntimeContext {
            pipeline: PipelineContext {
                chat,
                providers: ProviderRegistry::new(),
                tools: ToolRegistry::new(),
                memory: Arc::new(InMemoryMemory::new()),
                tracker: supervisor.tracker(),
                stop_manager: supervisor.stop_manager(),
            },
            invites: InviteRegistry::new(),
            scheduler: Scheduler::new(),
            stop_manager: supervisor.stop_manager(),
            backpressure: crate::backpressure::BackpressureLimiter::new(),
        });

        let message = Message {
            event_id: "evt-1".to_string(),
            room_id: "room-1".to_string(),
            sender_id: "human".to_string(),
            body: "hello".to_string(),
            mentions: BTreeSet::new(),
            thread_id: None,
            timestamp: chrono::Utc::now(),
            is_edit: false,
            replaces: None,
            transcribed_for: None,
        };

        supervisor.spawn_dispatch(runtime_ctx, "router".to_string(), message, Vec::new());
        supervisor.shutdown().await;

        assert!(supervisor.inflight.is_empty(), "shutdown must drain every tracked dispatch task");
    }
}

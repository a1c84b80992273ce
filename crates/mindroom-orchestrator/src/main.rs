//! The `mindroom` binary: loads a configuration document, boots one bot
//! per agent/router entity, and drives the fleet until shutdown. Tracing
//! init and config-load-with-fallback follow `skynet-gateway::main`'s
//! shape; the boot/reload/shutdown sequence itself is new (the teacher
//! only ever runs one always-on HTTP server, never a multi-bot fleet).

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dashmap::DashMap;
use mindroom_agent::{
    CalculatorTool, EchoTool, HttpLlmProvider, InMemoryMemory, InviteRegistry, LlmRouter,
    PipelineContext, ProviderRegistry, Scheduler, ToolRegistry,
};
use mindroom_core::constants::{EXIT_CONFIG_ERROR, EXIT_FATAL, EXIT_OK};
use mindroom_core::Message;
use mindroom_dispatch::DispatchEngine;
use mindroom_orchestrator::backpressure::BackpressureLimiter;
use mindroom_orchestrator::pipeline_runner::RuntimeContext;
use mindroom_orchestrator::supervisor::Supervisor;
use mindroom_orchestrator::MatrixBotFactory;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mindroom", about = "Runs a fleet of Matrix-connected LLM agents from a config document")]
struct Cli {
    /// Path to the configuration document (TOML).
    #[arg(long, env = "MINDROOM_CONFIG", default_value = "mindroom.toml")]
    config: String,

    /// Directory holding cached per-bot session credentials.
    #[arg(long, env = "MINDROOM_CREDENTIALS_DIR", default_value = "./credentials")]
    credentials_dir: String,

    /// Homeserver used for bots with no cached session yet.
    #[arg(long, env = "MINDROOM_HOMESERVER", default_value = "https://matrix.org")]
    homeserver: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindroom=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let snapshot = match mindroom_core::watcher::load(&cli.config) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!(%err, path = %cli.config, "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    };

    let providers = build_provider_registry(&snapshot);
    let router_model = snapshot
        .router()
        .common()
        .model_ref
        .as_deref()
        .and_then(|id| snapshot.model(id));
    let router: Arc<dyn mindroom_dispatch::RouterSuggester> = match router_model {
        Some(model) => match providers.get(&model.provider) {
            Some(provider) => Arc::new(LlmRouter::new(provider, model.model_id.clone())),
            None => {
                warn!(provider = %model.provider, "router model names an unregistered provider");
                Arc::new(mindroom_dispatch::NoOpRouter)
            }
        },
        None => {
            warn!("router has no resolvable model; routed handoffs always fall through to rule 10");
            Arc::new(mindroom_dispatch::NoOpRouter)
        }
    };

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(EchoTool));
    tools.register(Arc::new(CalculatorTool));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<(String, Message)>(256);
    let dispatch = Arc::new(DispatchEngine::new(router));
    let bot_factory = Arc::new(MatrixBotFactory::new(cli.credentials_dir, cli.homeserver));
    let supervisor = Arc::new(Supervisor::new(snapshot, bot_factory, dispatch, inbound_tx));
    supervisor.boot().await;

    let router_id = supervisor.registry().router().id().to_string();
    let Some(router_client) = supervisor.chat_client(&router_id) else {
        error!("router bot failed to start; cannot serve scheduled messages or commands");
        return ExitCode::from(EXIT_FATAL as u8);
    };

    let runtime_ctx = Arc::new(RuntimeContext {
        pipeline: PipelineContext {
            chat: router_client.clone(),
            providers,
            tools,
            memory: Arc::new(InMemoryMemory::new()),
            tracker: supervisor.tracker(),
            stop_manager: supervisor.stop_manager(),
        },
        invites: InviteRegistry::new(),
        scheduler: Scheduler::new(),
        stop_manager: supervisor.stop_manager(),
        backpressure: BackpressureLimiter::new(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_handle = mindroom_orchestrator::background::spawn_config_watcher(
        cli.config.clone(),
        supervisor.clone(),
        shutdown_rx.clone(),
    );
    let sweeper_handle = mindroom_orchestrator::background::spawn_schedule_sweeper(
        router_client,
        runtime_ctx.clone(),
        shutdown_rx.clone(),
    );
    let degraded_retry_handle = mindroom_orchestrator::background::spawn_degraded_retry_loop(
        supervisor.clone(),
        shutdown_rx.clone(),
    );

    let history: Arc<DashMap<String, Vec<Message>>> = Arc::new(DashMap::new());
    let inbound_loop = {
        let supervisor = supervisor.clone();
        let runtime_ctx = runtime_ctx.clone();
        let history = history.clone();
        tokio::spawn(async move {
            while let Some((receiving_bot_id, message)) = inbound_rx.recv().await {
                let thread_id = message.reply_thread_id().to_string();
                let mut entry = history.entry(thread_id).or_insert_with(Vec::new);
                let thread_history = entry.clone();
                entry.push(message.clone());
                drop(entry);

                supervisor.spawn_dispatch(runtime_ctx.clone(), receiving_bot_id, message, thread_history);
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to install ctrl-c handler; shutting down immediately");
    }
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    inbound_loop.abort();
    watcher_handle.abort();
    sweeper_handle.abort();
    degraded_retry_handle.abort();

    ExitCode::from(EXIT_OK as u8)
}

/// Provisions one `HttpLlmProvider` per distinct `provider` id across every
/// configured model, reading the API key from the model's `api_key_env`
/// variable when set.
fn build_provider_registry(snapshot: &mindroom_core::Snapshot) -> ProviderRegistry {
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut registry = ProviderRegistry::new();
    for model in snapshot.models() {
        if seen.insert(model.provider.clone(), ()).is_some() {
            continue;
        }
        let api_key = model
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default();
        let base_url = model
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        registry.register(Arc::new(HttpLlmProvider::new(model.provider.clone(), api_key, base_url)));
    }
    registry
}

//! Process-wide constants shared by every crate in the workspace.

/// Tool results are truncated to this many characters before being shown to
/// a user in a rewritten `<tool>` block.
pub const MAX_TOOL_RESULT_DISPLAY_CHARS: usize = 500;

/// Streaming edits are coalesced into batches at most this often.
pub const EDIT_BATCH_WINDOW_MS: u64 = 500;

/// Maximum number of event ids the dispatch engine's ResponseTracker
/// remembers before evicting the oldest entry.
pub const RESPONSE_TRACKER_CAPACITY: usize = 10_000;

/// How long the dispatch engine waits for Router.Suggest before falling
/// back to "no route" (rule 10).
pub const ROUTER_SUGGEST_TIMEOUT_MS: u64 = 8_000;

/// Linear backoff base for bot reconnects: `min(BOT_RECONNECT_MAX_MS, BOT_RECONNECT_STEP_MS * attempt)`.
pub const BOT_RECONNECT_STEP_MS: u64 = 5_000;
pub const BOT_RECONNECT_MAX_MS: u64 = 60_000;

/// Exponential backoff schedule (in seconds) for reply pipeline send/edit retries.
pub const PIPELINE_RETRY_BACKOFFS_SECS: &[u64] = &[1, 2, 4];

/// How often the config watcher polls the source document for changes.
pub const CONFIG_WATCH_POLL_MS: u64 = 1_000;

/// If no stream event arrives from the LLM backend within this long, the
/// pipeline treats the call as stalled and fails it (spec.md §5).
pub const LLM_STREAM_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Maximum time a single tool invocation is allowed to run before the
/// pipeline treats it as failed.
pub const TOOL_CALL_TIMEOUT_MS: u64 = 60_000;

/// Maximum time a chat send or edit call is allowed to take.
pub const CHAT_SEND_TIMEOUT_MS: u64 = 15_000;

/// Deadline the lifecycle supervisor gives in-flight work to wind down
/// during a graceful shutdown before it proceeds anyway.
pub const SHUTDOWN_DEADLINE_MS: u64 = 10_000;

/// Process exit codes (spec.md §6).
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Per-entity concurrency budget (spec.md §5): how many ReplyTasks an
/// entity may run at once before new dispatches queue instead of starting
/// immediately.
pub const ENTITY_CONCURRENCY_BUDGET: usize = 4;

/// Bound on the per-entity backlog queue (spec.md §5). Once full, a new
/// dispatch is dropped with `Ignore` and logged as overloaded.
pub const ENTITY_QUEUE_CAPACITY: usize = 32;

/// Minimum spacing between user-visible "degraded mode" notices sent to a
/// room after an overloaded dispatch (spec.md §7 Overloaded).
pub const OVERLOAD_NOTICE_INTERVAL_MS: u64 = 60_000;

/// ChatFatal bringup retry cadence (spec.md §7): how often the supervisor
/// retries starting a bot whose last bringup attempt failed fatally.
pub const DEGRADED_RETRY_MS: u64 = 60_000;

/// Rolling window used to count background-task restarts (spec.md §7
/// Internal). `FAULT_RESTART_LIMIT` restarts inside this window transitions
/// the entity to degraded.
pub const FAULT_RESTART_WINDOW_MS: u64 = 60_000;
pub const FAULT_RESTART_LIMIT: u32 = 3;

//! `!`-prefixed command handling (spec.md §6), intercepted by dispatch rule
//! 5 and always routed to the router's reply pipeline — by the time a
//! message reaches here it is guaranteed to be a recognized command shape
//! (dispatch already filtered on the leading `!`), so unlike the teacher's
//! slash handler this one never needs to fall through to the AI pipeline.
//!
//! Grounded on `skynet-agent::pipeline::slash::handle_slash_command`'s
//! `Option<String>`-per-command dispatch shape, with an in-memory
//! `InviteRegistry`/`Scheduler` standing in for the durable queues
//! spec.md's Non-goals exclude.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use mindroom_dispatch::StopManager;

/// Threads an invited entity has been added to. Ephemeral: lost on
/// restart, same as every other in-process-only component this crate owns.
#[derive(Default)]
pub struct InviteRegistry {
    invites: DashMap<String, Vec<String>>,
}

impl InviteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invite(&self, thread_id: &str, entity_id: &str) {
        let mut entry = self.invites.entry(thread_id.to_string()).or_default();
        if !entry.contains(&entity_id.to_string()) {
            entry.push(entity_id.to_string());
        }
    }

    pub fn list(&self, thread_id: &str) -> Vec<String> {
        self.invites.get(thread_id).map(|v| v.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledMessage {
    pub id: u64,
    pub room_id: String,
    pub text: String,
    pub fire_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory deferred-message queue for `!schedule`. A background sweeper
/// (owned by the orchestrator, per spec.md §4.6) polls `due()` and sends.
#[derive(Default)]
pub struct Scheduler {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, ScheduledMessage>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, room_id: &str, text: &str, delay: chrono::Duration) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fire_at = chrono::Utc::now() + delay;
        self.pending.lock().unwrap().insert(
            id,
            ScheduledMessage {
                id,
                room_id: room_id.to_string(),
                text: text.to_string(),
                fire_at,
            },
        );
        id
    }

    pub fn list(&self) -> Vec<ScheduledMessage> {
        let mut all: Vec<_> = self.pending.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|m| m.id);
        all
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.pending.lock().unwrap().remove(&id).is_some()
    }

    /// Entries whose `fire_at` has passed; removes them from the queue.
    pub fn take_due(&self) -> Vec<ScheduledMessage> {
        let mut pending = self.pending.lock().unwrap();
        let now = chrono::Utc::now();
        let due_ids: Vec<u64> = pending
            .iter()
            .filter(|(_, m)| m.fire_at <= now)
            .map(|(id, _)| *id)
            .collect();
        due_ids.iter().filter_map(|id| pending.remove(id)).collect()
    }
}

pub struct CommandContext<'a> {
    pub stop_manager: &'a StopManager,
    pub invites: &'a InviteRegistry,
    pub scheduler: &'a Scheduler,
}

/// Parses simple `<duration> <text>` schedule arguments: `30s`, `5m`, `2h`.
fn parse_duration(spec: &str) -> Option<chrono::Duration> {
    let spec = spec.trim();
    let (num, unit) = spec.split_at(spec.len().checked_sub(1)?);
    let n: i64 = num.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(n)),
        "m" => Some(chrono::Duration::minutes(n)),
        "h" => Some(chrono::Duration::hours(n)),
        _ => None,
    }
}

/// Handles a command body (leading `!` already confirmed by dispatch) and
/// returns the response text to post.
pub fn handle_command(ctx: &CommandContext, thread_id: &str, room_id: &str, body: &str) -> String {
    let trimmed = body.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "!help" => "**Commands**\n\
             - `!help` — show this help\n\
             - `!stop` — cancel the reply currently streaming in this thread\n\
             - `!invite @entity` — invite another entity into this thread\n\
             - `!list_invites` — list entities invited into this thread\n\
             - `!schedule <duration> <text>` — schedule a deferred message (e.g. `!schedule 10m remind the team`)\n\
             - `!list_schedules` — list pending scheduled messages\n\
             - `!cancel_schedule <n>` — cancel a scheduled message by id"
            .to_string(),

        "!stop" => {
            if ctx.stop_manager.cancel(thread_id) {
                "Cancelled the reply in progress in this thread.".to_string()
            } else {
                "Nothing is currently running in this thread.".to_string()
            }
        }

        "!invite" => {
            let entity_id = rest.trim_start_matches('@');
            if entity_id.is_empty() {
                "Usage: `!invite @entity`".to_string()
            } else {
                ctx.invites.invite(thread_id, entity_id);
                format!("Invited `{entity_id}` into this thread.")
            }
        }

        "!list_invites" => {
            let invited = ctx.invites.list(thread_id);
            if invited.is_empty() {
                "No entities have been invited into this thread.".to_string()
            } else {
                format!("Invited: {}", invited.join(", "))
            }
        }

        "!schedule" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            let duration_spec = args.next().unwrap_or("");
            let text = args.next().unwrap_or("").trim();
            match parse_duration(duration_spec) {
                Some(delay) if !text.is_empty() => {
                    let id = ctx.scheduler.schedule(room_id, text, delay);
                    format!("Scheduled message #{id} for {duration_spec} from now.")
                }
                _ => "Usage: `!schedule <duration> <text>`, e.g. `!schedule 10m remind the team`".to_string(),
            }
        }

        "!list_schedules" => {
            let pending = ctx.scheduler.list();
            if pending.is_empty() {
                "No scheduled messages pending.".to_string()
            } else {
                pending
                    .iter()
                    .map(|m| format!("#{}: \"{}\" at {}", m.id, m.text, m.fire_at.to_rfc3339()))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }

        "!cancel_schedule" => match rest.parse::<u64>() {
            Ok(id) if ctx.scheduler.cancel(id) => format!("Cancelled scheduled message #{id}."),
            Ok(id) => format!("No scheduled message #{id} found."),
            Err(_) => "Usage: `!cancel_schedule <n>`".to_string(),
        },

        other => format!("Unrecognized command `{other}`. Try `!help`."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx<'a>(stop: &'a StopManager, invites: &'a InviteRegistry, scheduler: &'a Scheduler) -> CommandContext<'a> {
        CommandContext {
            stop_manager: stop,
            invites,
            scheduler,
        }
    }

    #[test]
    fn stop_cancels_only_the_targeted_thread() {
        let stop = StopManager::new();
        let invites = InviteRegistry::new();
        let scheduler = Scheduler::new();
        stop.register("thread-a", CancellationToken::new());
        stop.register("thread-b", CancellationToken::new());

        let response = handle_command(&ctx(&stop, &invites, &scheduler), "thread-a", "room-1", "!stop");
        assert!(response.contains("Cancelled"));
        assert!(!stop.is_active("thread-a"));
        assert!(stop.is_active("thread-b"));
    }

    #[test]
    fn invite_then_list_invites_round_trips() {
        let stop = StopManager::new();
        let invites = InviteRegistry::new();
        let scheduler = Scheduler::new();
        handle_command(&ctx(&stop, &invites, &scheduler), "thread-a", "room-1", "!invite @agent-x");
        let response = handle_command(&ctx(&stop, &invites, &scheduler), "thread-a", "room-1", "!list_invites");
        assert!(response.contains("agent-x"));
    }

    #[test]
    fn schedule_then_cancel_removes_it() {
        let stop = StopManager::new();
        let invites = InviteRegistry::new();
        let scheduler = Scheduler::new();
        handle_command(&ctx(&stop, &invites, &scheduler), "thread-a", "room-1", "!schedule 10m hello");
        assert_eq!(scheduler.list().len(), 1);
        let id = scheduler.list()[0].id;
        let response = handle_command(
            &ctx(&stop, &invites, &scheduler),
            "thread-a",
            "room-1",
            &format!("!cancel_schedule {id}"),
        );
        assert!(response.contains("Cancelled"));
        assert!(scheduler.list().is_empty());
    }

    #[test]
    fn unrecognized_command_mentions_help() {
        let stop = StopManager::new();
        let invites = InviteRegistry::new();
        let scheduler = Scheduler::new();
        let response = handle_command(&ctx(&stop, &invites, &scheduler), "thread-a", "room-1", "!bogus");
        assert!(response.contains("!help"));
    }
}

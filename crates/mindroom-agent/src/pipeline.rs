//! Single-agent reply pipeline (spec.md §4.5.1): gather context, stream a
//! reply into the chat, intercept and execute tool calls, commit memory,
//! honor cancellation.
//!
//! Grounded on `skynet-agent::pipeline::process::process_message_non_streaming`'s
//! overall shape (gather context → build tools → resolve model → run →
//! persist → background memory commit) and `skynet-agent::tools::tool_loop`'s
//! iterate-until-no-more-tool-calls structure, adapted to MindRoom's
//! streaming-with-inline-tool-rendering requirement: each round opens a
//! fresh `send_stream` call, and a tool result is fed back as a
//! continuation round rather than within the same stream (§4.5.1 step 4).
//! The `tokio::select!` shape over stream events / edit ticks / cancellation
//! mirrors `mindroom-chat::runtime::BotRuntime`'s sync loop.

use std::sync::Arc;
use std::time::Duration;

use mindroom_core::constants::{
    CHAT_SEND_TIMEOUT_MS, EDIT_BATCH_WINDOW_MS, LLM_STREAM_IDLE_TIMEOUT_MS,
    PIPELINE_RETRY_BACKOFFS_SECS, TOOL_CALL_TIMEOUT_MS,
};
use mindroom_core::{Entity, Message, Snapshot, Thread};
use mindroom_dispatch::{ResponseTracker, StopManager};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::memory::{Memory, MemoryScope};
use crate::provider::{ChatRequest, StreamEvent};
use crate::providers::ProviderRegistry;
use crate::reply_task::ReplyTask;
use crate::tool::ToolRegistry;

/// Bounds the continuation-round loop (LLM → tool → LLM → ...), mirroring
/// the teacher's `tool_loop::MAX_ITERATIONS` backstop against a misbehaving
/// model that never stops calling tools.
const MAX_TOOL_ROUNDS: usize = 25;

/// Shared, process-wide collaborators the pipeline needs for every reply.
/// Each field is an external contract per spec.md §6; this crate supplies
/// only the reference implementations wired in by the orchestrator.
pub struct PipelineContext {
    pub chat: Arc<dyn mindroom_chat::ChatClient>,
    pub providers: ProviderRegistry,
    pub tools: ToolRegistry,
    pub memory: Arc<dyn Memory>,
    pub tracker: Arc<ResponseTracker>,
    pub stop_manager: Arc<StopManager>,
}

/// Runs the full single-agent pipeline to completion and returns the
/// finished `ReplyTask` (state `Done`, `Cancelled`, or `Failed`).
pub async fn run_single_agent_reply(
    ctx: &PipelineContext,
    snapshot: &Snapshot,
    message: &Message,
    thread_history: &[Message],
    entity_id: &str,
) -> ReplyTask {
    let thread_id = message.reply_thread_id().to_string();
    let mut task = ReplyTask::new(message.event_id.clone(), entity_id.to_string(), message.room_id.clone());

    let Some(Entity::Agent(common)) = snapshot.entity(entity_id) else {
        warn!(entity_id, "reply pipeline invoked for a non-agent entity");
        task.finalize_failed();
        return task;
    };

    let cancel_token = CancellationToken::new();
    ctx.stop_manager.register(&thread_id, cancel_token.clone());

    // Step 1: gather context.
    let thread = Thread::from_history(message.reply_thread_id(), thread_history.iter().cloned());
    let scope = MemoryScope::new(entity_id, &message.room_id);
    let recalled = ctx
        .memory
        .recall(&scope, &message.body, 5)
        .await
        .unwrap_or_else(|err| {
            warn!(%err, "memory recall failed, continuing without it");
            Vec::new()
        });
    let system = build_system_prompt(common, &recalled);
    let tools = ctx.tools.subset(&common.tool_ids);
    let tool_defs = ToolRegistry::to_definitions(&tools);

    // Step 2: placeholder message; all further updates are edits of this id.
    let mut output_id = match timeout(CHAT_SEND_TIMEOUT_MS, ctx.chat.send(&message.room_id, "…")).await {
        Some(Ok(id)) => id,
        _ => {
            warn!(entity_id, "failed to create placeholder message");
            ctx.stop_manager.clear(&thread_id);
            task.finalize_failed();
            return task;
        }
    };
    task.set_output_message_id(output_id.clone());

    let Some(model) = common.model_ref.as_deref().and_then(|id| snapshot.model(id)) else {
        warn!(entity_id, "agent has no resolvable model, failing reply");
        task.finalize_failed();
        ctx.stop_manager.clear(&thread_id);
        return task;
    };
    let Some(provider) = ctx.providers.get(&model.provider) else {
        warn!(provider = %model.provider, "no provider registered for this id");
        task.finalize_failed();
        ctx.stop_manager.clear(&thread_id);
        return task;
    };

    let mut raw_messages = build_raw_messages(&thread, message);
    let mut llm_retries = 0u32;
    let mut last_edit = String::new();

    'rounds: for _round in 0..MAX_TOOL_ROUNDS {
        let req = ChatRequest {
            model: model.model_id.clone(),
            system: system.clone(),
            messages: Vec::new(),
            max_tokens: 4096,
            tools: tool_defs.clone(),
            raw_messages: Some(raw_messages.clone()),
        };

        let (tx, mut rx) = mpsc::channel(64);
        let stream_provider = provider.clone();
        let stream_handle = tokio::spawn(async move { stream_provider.send_stream(&req, tx).await });

        let mut edit_interval = tokio::time::interval(Duration::from_millis(EDIT_BATCH_WINDOW_MS));
        let mut dirty = false;
        let mut tool_calls_this_round: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut idle_timed_out = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    task.cancel();
                    stream_handle.abort();
                    flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
                    ctx.stop_manager.clear(&thread_id);
                    return task;
                }
                _ = edit_interval.tick() => {
                    if dirty {
                        flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
                        dirty = false;
                    }
                }
                event = tokio::time::timeout(Duration::from_millis(LLM_STREAM_IDLE_TIMEOUT_MS), rx.recv()) => {
                    let Ok(event) = event else {
                        warn!("llm stream idle timeout");
                        idle_timed_out = true;
                        stream_handle.abort();
                        break;
                    };
                    match event {
                        Some(StreamEvent::TextDelta { text }) => {
                            task.push_text(&text);
                            dirty = true;
                        }
                        Some(StreamEvent::ToolCallStarted { id, name, input }) => {
                            task.start_tool_call(id.clone(), name.clone(), input.to_string());
                            flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;

                            match execute_tool(&ctx.tools, &name, input.clone(), &cancel_token).await {
                                Some(result) => {
                                    task.complete_tool_call(&id, &result.content, result.is_error);
                                    flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
                                    tool_calls_this_round.push((id, name, input));
                                    // step 6/7 truncation and ordering live in ReplyTask::render
                                }
                                None => {
                                    // cancelled while the tool call was in flight (spec.md §5:
                                    // "cancelling a ReplyTask aborts any tool it is awaiting").
                                    task.cancel();
                                    stream_handle.abort();
                                    flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
                                    ctx.stop_manager.clear(&thread_id);
                                    return task;
                                }
                            }
                        }
                        Some(StreamEvent::Done { .. }) => {
                            break;
                        }
                        Some(StreamEvent::Error { message: err }) => {
                            warn!(%err, "llm stream error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if idle_timed_out {
            if llm_retries < 2 {
                llm_retries += 1;
                warn!(attempt = llm_retries, "retrying after llm stream idle timeout");
                continue 'rounds;
            }
            warn!("llm stream idle timeout, retries exhausted, failing reply");
            task.push_text("\n(error: llm stream went idle)");
            flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
            task.finalize_failed();
            ctx.stop_manager.clear(&thread_id);
            return task;
        }

        match stream_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_transient() && llm_retries < 2 => {
                llm_retries += 1;
                warn!(%err, attempt = llm_retries, "retrying transient llm error");
                continue 'rounds;
            }
            Ok(Err(err)) => {
                warn!(%err, "unrecoverable llm error, failing reply");
                task.push_text(&format!("\n(error: {err})"));
                flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await;
                task.finalize_failed();
                ctx.stop_manager.clear(&thread_id);
                return task;
            }
            Err(_join_err) => {
                warn!("llm stream task panicked");
                task.finalize_failed();
                ctx.stop_manager.clear(&thread_id);
                return task;
            }
        }

        if tool_calls_this_round.is_empty() {
            break;
        }
        for (id, name, input) in &tool_calls_this_round {
            append_tool_round(&mut raw_messages, id, name, input, &task);
        }
    }

    task.begin_finalizing();
    if flush_edit(ctx, message, &mut output_id, &mut task, &mut last_edit).await {
        task.finalize_done();
    } else {
        warn!(output_id = %output_id, "could not deliver the final reply after exhausting edit/rebase retries");
        task.finalize_failed();
    }

    // Step 8: background memory commit, never blocking the reply.
    let memory = ctx.memory.clone();
    let commit_scope = scope.clone();
    let summary = task.render();
    tokio::spawn(async move {
        if let Err(err) = memory.commit(&commit_scope, "reply", &summary).await {
            warn!(%err, "memory commit failed, dropping");
        }
    });

    // Step 9: cleanup.
    ctx.stop_manager.clear(&thread_id);
    task
}

fn build_system_prompt(common: &mindroom_core::EntityCommon, recalled: &[crate::memory::MemoryEntry]) -> String {
    let mut prompt = common.instructions.clone().unwrap_or_default();
    if !recalled.is_empty() {
        prompt.push_str("\n\nRelevant memory:\n");
        for entry in recalled {
            prompt.push_str("- ");
            prompt.push_str(&entry.content);
            prompt.push('\n');
        }
    }
    prompt
}

fn build_raw_messages(thread: &Thread, new_message: &Message) -> Vec<serde_json::Value> {
    let mut messages: Vec<serde_json::Value> = thread
        .messages
        .iter()
        .map(|m| serde_json::json!({"role": "user", "content": m.body}))
        .collect();
    messages.push(serde_json::json!({"role": "user", "content": new_message.body}));
    messages
}

pub(crate) fn append_tool_round(raw_messages: &mut Vec<serde_json::Value>, id: &str, name: &str, input: &serde_json::Value, task: &ReplyTask) {
    let result = task
        .tool_trace
        .iter()
        .rev()
        .find(|r| r.call_id == id)
        .and_then(|r| r.result_preview.clone())
        .unwrap_or_default();
    raw_messages.push(serde_json::json!({
        "role": "assistant",
        "content": [{"type": "tool_use", "id": id, "name": name, "input": input}],
    }));
    raw_messages.push(serde_json::json!({
        "role": "user",
        "content": [{"type": "tool_result", "tool_use_id": id, "content": result}],
    }));
}

/// Runs `name` against `input`, raced against `cancel` so a `!stop` or
/// shutdown can interrupt an in-flight call instead of waiting out
/// `TOOL_CALL_TIMEOUT_MS`. `None` means the cancellation won the race.
pub(crate) async fn execute_tool(
    tools: &ToolRegistry,
    name: &str,
    input: serde_json::Value,
    cancel: &CancellationToken,
) -> Option<crate::tool::ToolResult> {
    let Some(tool) = tools.get(name) else {
        return Some(crate::tool::ToolResult::error(format!("unknown tool '{name}'")));
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(Duration::from_millis(TOOL_CALL_TIMEOUT_MS), tool.execute(input)) => {
            Some(match result {
                Ok(result) => result,
                Err(_) => crate::tool::ToolResult::error("tool call timed out"),
            })
        }
    }
}

/// Delivers `task`'s current render to the chat as an edit of `output_id`.
/// On failure or timeout, retries with `PIPELINE_RETRY_BACKOFFS_SECS`
/// backoff, re-rendering the body before each attempt (rebase); once those
/// retries are exhausted it sends a brand new message and abandons the old
/// id (updating `*output_id` and `task`'s tracked id to match). Returns
/// whether the body was ultimately delivered one way or the other.
async fn flush_edit(
    ctx: &PipelineContext,
    message: &Message,
    output_id: &mut String,
    task: &mut ReplyTask,
    last_edit: &mut String,
) -> bool {
    let mut body = task.render();
    if body == *last_edit {
        return true;
    }
    if let Some(Ok(())) = timeout(CHAT_SEND_TIMEOUT_MS, ctx.chat.edit(&message.room_id, output_id, &body)).await {
        *last_edit = body;
        return true;
    }

    for (attempt, backoff_secs) in PIPELINE_RETRY_BACKOFFS_SECS.iter().enumerate() {
        warn!(output_id = %output_id, attempt = attempt + 1, backoff_secs, "chat edit failed or timed out, retrying");
        tokio::time::sleep(Duration::from_secs(*backoff_secs)).await;
        body = task.render();
        if let Some(Ok(())) = timeout(CHAT_SEND_TIMEOUT_MS, ctx.chat.edit(&message.room_id, output_id, &body)).await {
            *last_edit = body;
            return true;
        }
    }

    warn!(output_id = %output_id, "edit retries exhausted, rebasing onto a new message");
    body = task.render();
    match timeout(CHAT_SEND_TIMEOUT_MS, ctx.chat.send(&message.room_id, &body)).await {
        Some(Ok(new_id)) => {
            warn!(old_output_id = %output_id, new_output_id = %new_id, "abandoned stale message id after exhausted rebase");
            task.set_output_message_id(new_id.clone());
            *output_id = new_id;
            *last_edit = body;
            true
        }
        _ => {
            warn!(output_id = %output_id, "fallback send after exhausted edit retries also failed");
            false
        }
    }
}

async fn timeout<F: std::future::Future>(ms: u64, fut: F) -> Option<F::Output> {
    tokio::time::timeout(Duration::from_millis(ms), fut).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_messages_append_user_and_new_message_in_order() {
        let thread = Thread {
            thread_id: "t1".into(),
            messages: vec![],
        };
        let msg = crate::tests_support::sample_message("evt-1", "room-1", "hello");
        let raw = build_raw_messages(&thread, &msg);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0]["content"], "hello");
    }
}

//! Turns a `Decision` from `mindroom-dispatch` into actual reply work: the
//! single-agent pipeline, the team pipeline, or a `!`-command response.
//! New wiring code — the teacher has nothing resembling a dispatch-decision
//! dispatch table, since it only ever addresses a single assistant.

use std::sync::Arc;

use mindroom_agent::{handle_command, CommandContext, InviteRegistry, PipelineContext, Scheduler};
use mindroom_core::{Message, Snapshot};
use mindroom_dispatch::{Decision, StopManager};
use tracing::warn;

use crate::backpressure::{Admission, BackpressureLimiter};

pub struct RuntimeContext {
    pub pipeline: PipelineContext,
    pub invites: InviteRegistry,
    pub scheduler: Scheduler,
    pub stop_manager: Arc<StopManager>,
    pub backpressure: BackpressureLimiter,
}

const OVERLOAD_NOTICE: &str = "This assistant is currently handling too many replies at once; this message was dropped. Please retry shortly.";

pub async fn dispatch_and_run(
    ctx: &RuntimeContext,
    snapshot: &Snapshot,
    message: &Message,
    thread_history: &[Message],
    decision: Decision,
) {
    match decision {
        Decision::Ignore => {}
        Decision::RouterCommand => {
            let cmd_ctx = CommandContext {
                stop_manager: &ctx.stop_manager,
                invites: &ctx.invites,
                scheduler: &ctx.scheduler,
            };
            let response = handle_command(&cmd_ctx, message.reply_thread_id(), &message.room_id, &message.body);
            if let Err(err) = ctx.pipeline.chat.send(&message.room_id, &response).await {
                warn!(%err, "failed to send command response");
            }
        }
        Decision::HandleWith(entity_id) => match ctx.backpressure.admit(&entity_id).await {
            Admission::Admitted(_guard) => {
                mindroom_agent::run_single_agent_reply(&ctx.pipeline, snapshot, message, thread_history, &entity_id).await;
            }
            Admission::Overloaded { notify } => {
                warn!(entity_id, "dispatch dropped: entity is overloaded");
                if notify {
                    let _ = ctx.pipeline.chat.send(&message.room_id, OVERLOAD_NOTICE).await;
                }
            }
        },
        Decision::HandleWithTeam(members, mode) => {
            let team_key = members.join(",");
            match ctx.backpressure.admit(&team_key).await {
                Admission::Admitted(_guard) => {
                    mindroom_agent::run_team_reply(&ctx.pipeline, snapshot, message, &members, mode).await;
                }
                Admission::Overloaded { notify } => {
                    warn!(team = %team_key, "team dispatch dropped: team is overloaded");
                    if notify {
                        let _ = ctx.pipeline.chat.send(&message.room_id, OVERLOAD_NOTICE).await;
                    }
                }
            }
        }
    }
}

pub mod commands;
pub mod http_provider;
pub mod llm_router;
pub mod memory;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod reply_task;
pub mod team;
pub mod tool;

#[cfg(test)]
mod tests_support;

pub use commands::{handle_command, CommandContext, InviteRegistry, Scheduler};
pub use http_provider::HttpLlmProvider;
pub use llm_router::LlmRouter;
pub use memory::{InMemoryMemory, Memory, MemoryScope};
pub use pipeline::{run_single_agent_reply, PipelineContext};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamEvent};
pub use providers::ProviderRegistry;
pub use reply_task::{ReplyTask, ReplyTaskState, ToolCallRecord, ToolCallState};
pub use team::run_team_reply;
pub use tool::{CalculatorTool, EchoTool, Tool, ToolRegistry, ToolResult};

//! `ReplyTask` (spec.md §4.5): the in-flight assembly of one reply, owning
//! its output chat message. Renders as an ordered list of `Segment`s so a
//! pending tool block can be located and rewritten in place by `call_id`
//! without ever emitting a second block for the same call (§4.5.1 step 4).
//!
//! New to this crate — the teacher has no streaming-reply-with-inline-tool-
//! rendering precedent; the state machine shape follows spec.md §4.5.4
//! literally, and the truncation/rendering conventions follow §4.5.1's
//! numbered steps directly.

use mindroom_core::constants::MAX_TOOL_RESULT_DISPLAY_CHARS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub args_preview: String,
    pub result_preview: Option<String>,
    pub truncated: bool,
    pub state: ToolCallState,
}

/// One piece of the rendered reply: either free text, or a reference to a
/// tool call whose rendering is looked up live from `tool_trace` (so
/// rewriting a call's result never requires finding-and-replacing text).
#[derive(Debug, Clone)]
pub enum Segment {
    Text(String),
    Tool(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTaskState {
    Init,
    Streaming,
    ToolRunning,
    Finalizing,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReplyTask {
    pub event_id: String,
    pub entity_id: String,
    pub room_id: String,
    pub output_message_id: Option<String>,
    segments: Vec<Segment>,
    pub tool_trace: Vec<ToolCallRecord>,
    pub cancelled: bool,
    pub state: ReplyTaskState,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ReplyTask {
    pub fn new(event_id: impl Into<String>, entity_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            entity_id: entity_id.into(),
            room_id: room_id.into(),
            output_message_id: None,
            segments: Vec::new(),
            tool_trace: Vec::new(),
            cancelled: false,
            state: ReplyTaskState::Init,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn set_output_message_id(&mut self, id: impl Into<String>) {
        self.output_message_id = Some(id.into());
        self.state = ReplyTaskState::Streaming;
    }

    /// Append a text delta to the currently open segment, starting a new
    /// text segment if the tail is a tool block.
    pub fn push_text(&mut self, delta: &str) {
        match self.segments.last_mut() {
            Some(Segment::Text(buf)) => buf.push_str(delta),
            _ => self.segments.push(Segment::Text(delta.to_string())),
        }
    }

    /// Begin a pending tool block (§4.5.1 step 4): Streaming → ToolRunning.
    pub fn start_tool_call(&mut self, call_id: impl Into<String>, tool_name: impl Into<String>, args_preview: impl Into<String>) {
        let index = self.tool_trace.len();
        self.tool_trace.push(ToolCallRecord {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args_preview: args_preview.into(),
            result_preview: None,
            truncated: false,
            state: ToolCallState::Pending,
        });
        self.segments.push(Segment::Tool(index));
        self.state = ReplyTaskState::ToolRunning;
    }

    /// Rewrite the pending block matching `call_id` in place with its
    /// result (§4.5.1 step 4/6): ToolRunning → Streaming.
    pub fn complete_tool_call(&mut self, call_id: &str, result: &str, failed: bool) {
        if let Some(record) = self.tool_trace.iter_mut().find(|r| r.call_id == call_id) {
            let (preview, truncated) = truncate_result(result);
            record.result_preview = Some(preview);
            record.truncated = truncated;
            record.state = if failed { ToolCallState::Failed } else { ToolCallState::Completed };
        }
        self.state = ReplyTaskState::Streaming;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.state = ReplyTaskState::Cancelled;
    }

    pub fn finalize_done(&mut self) {
        self.state = ReplyTaskState::Done;
    }

    pub fn finalize_failed(&mut self) {
        self.state = ReplyTaskState::Failed;
    }

    pub fn begin_finalizing(&mut self) {
        self.state = ReplyTaskState::Finalizing;
    }

    /// Renders the current accumulated content as chat-message body text,
    /// one `<tool>` block per call in invocation order (§4.5.1 step 7).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Tool(index) => {
                    out.push_str(&render_tool_block(&self.tool_trace[*index]));
                }
            }
        }
        if self.state == ReplyTaskState::Cancelled {
            out.push_str(" (cancelled)");
        }
        out
    }
}

fn render_tool_block(record: &ToolCallRecord) -> String {
    match (&record.state, &record.result_preview) {
        (ToolCallState::Pending, _) => format!("<tool>{}</tool>", record.tool_name),
        (ToolCallState::Completed, Some(result)) => {
            format!("<tool>{}\n{}</tool>", record.tool_name, result)
        }
        (ToolCallState::Failed, Some(result)) => {
            format!("<tool>{} [failed]\n{}</tool>", record.tool_name, result)
        }
        _ => format!("<tool>{}</tool>", record.tool_name),
    }
}

/// §4.5.1 step 6: truncate to `MAX_TOOL_RESULT_DISPLAY_CHARS`, appending an
/// ellipsis with the original size when truncated.
fn truncate_result(result: &str) -> (String, bool) {
    if result.chars().count() <= MAX_TOOL_RESULT_DISPLAY_CHARS {
        return (result.to_string(), false);
    }
    let truncated: String = result.chars().take(MAX_TOOL_RESULT_DISPLAY_CHARS).collect();
    (format!("{truncated}... ({} chars total)", result.chars().count()), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_rewrites_in_place_never_duplicates() {
        let mut task = ReplyTask::new("evt-1", "agent-1", "room-1");
        task.push_text("looking it up: ");
        task.start_tool_call("call-1", "search", "{\"q\":\"rust\"}");
        assert_eq!(task.state, ReplyTaskState::ToolRunning);
        task.complete_tool_call("call-1", "found 3 results", false);
        assert_eq!(task.state, ReplyTaskState::Streaming);
        assert_eq!(task.tool_trace.len(), 1);
        let rendered = task.render();
        assert_eq!(rendered.matches("<tool>").count(), 1);
        assert!(rendered.contains("found 3 results"));
    }

    #[test]
    fn truncation_marks_the_record_and_appends_size() {
        let mut task = ReplyTask::new("evt-1", "agent-1", "room-1");
        task.start_tool_call("call-1", "dump", "{}");
        let big = "x".repeat(MAX_TOOL_RESULT_DISPLAY_CHARS + 50);
        task.complete_tool_call("call-1", &big, false);
        assert!(task.tool_trace[0].truncated);
        assert!(task.tool_trace[0].result_preview.as_ref().unwrap().contains("chars total"));
    }

    #[test]
    fn cancel_appends_marker_and_blocks_further_tool_calls_conceptually() {
        let mut task = ReplyTask::new("evt-1", "agent-1", "room-1");
        task.push_text("partial reply");
        task.cancel();
        assert_eq!(task.state, ReplyTaskState::Cancelled);
        assert!(task.render().ends_with("(cancelled)"));
    }

    #[test]
    fn consecutive_tool_blocks_preserve_invocation_order() {
        let mut task = ReplyTask::new("evt-1", "agent-1", "room-1");
        task.start_tool_call("call-1", "a", "{}");
        task.complete_tool_call("call-1", "r1", false);
        task.start_tool_call("call-2", "b", "{}");
        task.complete_tool_call("call-2", "r2", false);
        let rendered = task.render();
        assert!(rendered.find("r1").unwrap() < rendered.find("r2").unwrap());
    }
}

//! Turn engine: the bounded model-call / tool-call loop
//!
//! One user turn appends a user message, asks the model, runs any requested
//! tools in order and feeds their results back until the model answers with
//! plain text or the round limit is reached.

mod engine;
mod history;
mod message;

pub use engine::{FALLBACK_REPLY, MAX_TOOL_ROUNDS, TurnEngine, TurnReply};
pub use history::HistoryPolicy;
pub use message::{Message, Role, ToolCallRequest};

/// Lifecycle of a single in-flight turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// No turn running
    #[default]
    Idle,
    /// Waiting on the model client
    AwaitingModel,
    /// Running tool calls from the last model response
    ExecutingTools,
    /// Final text was handed to speech synthesis
    Speaking,
    /// Turn produced an answer
    Done,
    /// Turn ended with the fallback reply
    Failed,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::ExecutingTools => "executing_tools",
            Self::Speaking => "speaking",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

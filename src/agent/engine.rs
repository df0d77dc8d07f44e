//! Turn engine

use std::sync::Arc;

use super::{HistoryPolicy, Message, ToolCallRequest, TurnState};
use crate::llm::ModelClient;
use crate::tools::{ToolRegistry, ToolResult, error_result};
use crate::{Error, Result};

/// Maximum model calls per turn
pub const MAX_TOOL_ROUNDS: usize = 3;

/// Reply used when a turn cannot produce an answer
pub const FALLBACK_REPLY: &str = "Sorry Sir, I'm having trouble fetching that right now.";

/// Outcome of one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    /// Text shown and spoken to the user, never empty
    pub text: String,

    /// `Done` or `Failed`
    pub state: TurnState,

    /// Number of model calls made
    pub rounds: usize,

    /// Number of tool calls executed
    pub tool_calls: usize,
}

impl TurnReply {
    /// Whether the reply is the fallback text
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.state == TurnState::Failed
    }
}

/// Drives the model/tool loop and owns the conversation history
pub struct TurnEngine {
    client: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    history: Vec<Message>,
    policy: HistoryPolicy,
    max_rounds: usize,
    fallback: String,
    state: TurnState,
    rounds: usize,
    tool_calls: usize,
}

impl TurnEngine {
    /// Create an engine with empty history
    #[must_use]
    pub fn new(client: Arc<dyn ModelClient>, tools: ToolRegistry) -> Self {
        Self {
            client,
            tools,
            history: Vec::new(),
            policy: HistoryPolicy::default(),
            max_rounds: MAX_TOOL_ROUNDS,
            fallback: FALLBACK_REPLY.to_string(),
            state: TurnState::Idle,
            rounds: 0,
            tool_calls: 0,
        }
    }

    /// Seed history with a system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.is_empty() {
            self.history.insert(0, Message::system(prompt));
        }
        self
    }

    /// Set the history growth policy
    #[must_use]
    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the round limit (at least one round always runs)
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Override the fallback reply
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Conversation history in model order
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// State of the current or last turn
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Record that the last reply was handed to speech synthesis
    ///
    /// The state stays `Speaking` until the next turn starts; a turn that is
    /// still running is left alone.
    pub fn mark_speaking(&mut self) {
        if matches!(self.state, TurnState::Done | TurnState::Failed) {
            self.state = TurnState::Speaking;
        }
    }

    /// Registered tools
    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one user turn and return a reply that is never empty
    ///
    /// Model failures and round exhaustion are logged and answered with the
    /// fallback reply; tool failures are routed back to the model.
    pub async fn run_turn(&mut self, user_text: &str) -> TurnReply {
        self.rounds = 0;
        self.tool_calls = 0;

        tracing::info!(chars = user_text.len(), "turn started");

        let (text, state) = match self.drive(user_text).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::warn!("model returned empty answer");
                (self.fallback.clone(), TurnState::Failed)
            }
            Ok(text) => (text, TurnState::Done),
            Err(e) => {
                tracing::warn!(error = %e, rounds = self.rounds, "turn failed");
                (self.fallback.clone(), TurnState::Failed)
            }
        };

        self.state = state;
        tracing::info!(
            rounds = self.rounds,
            tool_calls = self.tool_calls,
            state = %state,
            "turn complete"
        );

        TurnReply {
            text,
            state,
            rounds: self.rounds,
            tool_calls: self.tool_calls,
        }
    }

    async fn drive(&mut self, user_text: &str) -> Result<String> {
        self.history.push(Message::user(user_text));
        let trimmed = self.policy.apply(&mut self.history);
        if trimmed > 0 {
            tracing::debug!(removed = trimmed, "trimmed conversation history");
        }

        let schemas = self.tools.declare();

        while self.rounds < self.max_rounds {
            self.rounds += 1;
            self.state = TurnState::AwaitingModel;

            let response = self.client.complete(&self.history, &schemas).await?;
            let calls = response.tool_calls.clone();
            let text = response.content.trim().to_string();
            self.history.push(response);

            if calls.is_empty() {
                return Ok(text);
            }

            self.state = TurnState::ExecutingTools;
            for call in &calls {
                let result = self.dispatch(call).await;
                self.history.push(Message::tool_result(call, &result));
                self.tool_calls += 1;
            }
        }

        Err(Error::Agent(format!(
            "no final answer after {} tool rounds",
            self.max_rounds
        )))
    }

    /// Run one tool call, turning any failure into an error result
    async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        tracing::info!(tool = %call.name, id = %call.id, args = ?call.arguments, "calling tool");

        match self.tools.invoke(&call.name, &call.arguments).await {
            Ok(result) => {
                tracing::debug!(tool = %call.name, ?result, "tool result");
                result
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool failed");
                error_result(e.to_string())
            }
        }
    }
}

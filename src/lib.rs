//! Jarvis - a voice assistant turn pipeline
//!
//! This library provides the core of the Jarvis assistant:
//! - A bounded model-call / tool-call loop over a hosted language model
//! - Local tools exposed to the model
//! - Streaming speech synthesis over a websocket session
//! - Ordered audio playback with barge-in
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interface                         │
//! │        CLI prompt  │  TurnObserver callbacks         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ submit / shutdown
//! ┌────────────────────▼────────────────────────────────┐
//! │                Turn Coordinator                      │
//! │   Turn Engine  │  Tool Registry  │  History Policy   │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │ final text                   │ Model Client
//! ┌──────────▼───────────┐       ┌──────────▼───────────┐
//! │  Speech session (WS) │       │   Gemini │ OpenAI    │
//! │  → Playback sink     │       └──────────────────────┘
//! └──────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod tools;
pub mod voice;

pub use agent::{
    FALLBACK_REPLY, HistoryPolicy, MAX_TOOL_ROUNDS, Message, Role, ToolCallRequest, TurnEngine,
    TurnReply, TurnState,
};
pub use config::{Config, LlmBackend, Overrides};
pub use coordinator::{EventChannel, Phase, TurnCoordinator, TurnEvent, TurnId, TurnObserver};
pub use error::{Error, Result};
pub use llm::ModelClient;
pub use tools::{TodayDateTool, Tool, ToolRegistry, ToolSchema};
pub use voice::{AudioFrame, OutputDevice, PlaybackSink, SpeechStreamer, SpeechSynthesizer};

//! Error types for the Jarvis voice assistant

use thiserror::Error;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Language model call failed or returned something unusable
    #[error("model error: {0}")]
    Model(String),

    /// Tool invocation failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Tool lookup failed
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Agent loop error
    #[error("agent error: {0}")]
    Agent(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Input queue is full
    #[error("assistant is busy, input queue full")]
    Busy,

    /// Pipeline has been shut down
    #[error("assistant has shut down")]
    ShutDown,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

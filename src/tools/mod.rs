//! Local tools the language model may call
//!
//! Tools are declared to the model with a JSON schema and invoked by exact
//! name through the [`ToolRegistry`].

mod datetime;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use datetime::{Clock, FixedClock, SystemClock, TodayDateTool};
pub use registry::ToolRegistry;

use crate::Result;

/// Structured arguments passed to a tool
pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Structured key/value result returned by a tool
pub type ToolResult = serde_json::Map<String, serde_json::Value>;

/// Declaration of a tool as exposed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name used for dispatch
    pub name: String,

    /// Human-readable description for the model
    pub description: String,

    /// JSON schema of the parameter object
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Schema for a tool that takes no parameters
    #[must_use]
    pub fn without_parameters(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }
}

/// A locally executed tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declaration sent to the model on every call
    fn schema(&self) -> ToolSchema;

    /// Run the tool
    ///
    /// # Errors
    ///
    /// Returns error if the tool fails; the caller routes it back to the model
    async fn invoke(&self, args: &ToolArgs) -> Result<ToolResult>;
}

/// Registry holding the built-in tools
#[must_use]
pub fn builtin(timezone: chrono_tz::Tz) -> ToolRegistry {
    ToolRegistry::new().with_tool(TodayDateTool::new(timezone))
}

/// Build the error result handed back to the model when a tool cannot run
#[must_use]
pub fn error_result(message: impl Into<String>) -> ToolResult {
    let mut result = ToolResult::new();
    result.insert("error".to_string(), serde_json::Value::String(message.into()));
    result
}

//! Name-indexed tool registry

use std::sync::Arc;

use super::{Tool, ToolArgs, ToolResult, ToolSchema};
use crate::{Error, Result};

/// Maps tool names to implementations, preserving declaration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<(ToolSchema, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    /// Register an already shared tool
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        if let Some(slot) = self.tools.iter_mut().find(|(s, _)| s.name == schema.name) {
            tracing::debug!(tool = %schema.name, "replacing registered tool");
            *slot = (schema, tool);
        } else {
            self.tools.push((schema, tool));
        }
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    /// Schemas of all registered tools, in registration order
    #[must_use]
    pub fn declare(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|(schema, _)| schema.clone()).collect()
    }

    /// Registered tool names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|(schema, _)| schema.name.clone()).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by exact name
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownTool` if no tool has that name, or the tool's own
    /// error if it fails
    pub async fn invoke(&self, name: &str, args: &ToolArgs) -> Result<ToolResult> {
        let tool = self
            .tools
            .iter()
            .find(|(schema, _)| schema.name == name)
            .map(|(_, tool)| Arc::clone(tool))
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        tool.invoke(args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

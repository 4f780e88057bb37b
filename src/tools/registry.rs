//! Routes tool calls across several sessions by tool name

use super::mcp::{McpError, McpStdioSession};
use crate::llm::ToolDefinition;
use crate::runtime::{ToolContent, ToolInvocationError, ToolSession};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Aggregated tool session. The first session to offer a name owns it.
#[derive(Default)]
pub struct ToolRegistry {
    sessions: Vec<Box<dyn ToolSession>>,
    routes: HashMap<String, usize>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn and register every server script. Scripts that fail to start are
    /// returned alongside the registry instead of aborting the rest.
    pub async fn connect_scripts(scripts: &[PathBuf]) -> (Self, Vec<(PathBuf, McpError)>) {
        let mut registry = Self::new();
        let mut failures = Vec::new();

        for script in scripts {
            let session = match McpStdioSession::spawn(script).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(script = %script.display(), error = %e, "Failed to connect MCP server");
                    failures.push((script.clone(), e));
                    continue;
                }
            };
            if let Err(e) = registry.register(Box::new(session)).await {
                tracing::warn!(script = %script.display(), error = %e, "Failed to list tools");
                failures.push((script.clone(), McpError::Protocol(e.to_string())));
            }
        }

        (registry, failures)
    }

    /// Add a session and route its tools; returns how many tools it contributed
    pub async fn register(
        &mut self,
        session: Box<dyn ToolSession>,
    ) -> Result<usize, ToolInvocationError> {
        let tools = session.list_tools().await?;
        let slot = self.sessions.len();
        let mut added = 0;

        for tool in tools {
            if self.routes.contains_key(&tool.name) {
                tracing::warn!(tool = %tool.name, "Duplicate tool name, keeping first registration");
                continue;
            }
            self.routes.insert(tool.name.clone(), slot);
            self.definitions.push(tool);
            added += 1;
        }

        self.sessions.push(session);
        Ok(added)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl ToolSession for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        Ok(self.definitions.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        let slot = self
            .routes
            .get(name)
            .ok_or_else(|| ToolInvocationError::UnknownTool(name.to_string()))?;
        self.sessions[*slot].call_tool(name, arguments).await
    }
}

//! Trait abstractions for the tool-execution session
//!
//! These traits enable testing the orchestrator with mock implementations.

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Payload returned by a tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    /// Typed content block exposing a text field
    Text { text: String },
    /// Mapping with a `text` field, a list of content blocks, or an opaque value
    Json(Value),
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }
}

/// A single tool call failed. Never aborts the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolInvocationError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Failed(String),
    #[error("tool session error: {0}")]
    Session(String),
}

/// Tool-execution session.
///
/// Used serially by one orchestrator; implementations need not support
/// concurrent calls.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Tools available in this session
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError>;

    /// Invoke a tool by name. `arguments` is the parsed argument object, or the
    /// raw string when the model's payload was not valid JSON.
    async fn call_tool(&self, name: &str, arguments: Value)
        -> Result<ToolContent, ToolInvocationError>;
}

#[async_trait]
impl<T: ToolSession + ?Sized> ToolSession for Arc<T> {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        (**self).list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        (**self).call_tool(name, arguments).await
    }
}

#[async_trait]
impl<T: ToolSession + ?Sized> ToolSession for Box<T> {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        (**self).list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        (**self).call_tool(name, arguments).await
    }
}

//! Common types for chat interactions

/// Chat request: the full history plus, when tool invocation is enabled
/// for the turn, the tool schema offered to the model.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
}

impl ChatRequest {
    pub fn with_tools(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools: Some(tools),
        }
    }

    pub fn text_only(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: None,
        }
    }

    pub fn tools_enabled(&self) -> bool {
        self.tools.is_some()
    }
}

/// Message in conversation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        text: String,
        tool_calls: Vec<ToolCallRef>,
    },
    ToolResult {
        tool_call_id: String,
        text: String,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCallRef>) -> Self {
        Message::Assistant {
            text: text.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            text: text.into(),
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult { .. })
    }
}

/// A tool call as declared by an assistant message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    /// Raw argument payload exactly as the model streamed it
    pub arguments: String,
}

/// Tool definition offered to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

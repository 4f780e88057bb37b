//! Append-only conversation history

use crate::llm::Message;
use thiserror::Error;

/// Rejected append
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("tool result {0} does not follow an assistant message")]
    NoPrecedingAssistant(String),
    #[error("tool result {0} does not match any call declared by the preceding assistant message")]
    UnknownToolCall(String),
    #[error("tool result {0} was already recorded")]
    DuplicateToolResult(String),
}

/// Ordered message log owned by a single orchestrator.
///
/// A tool result may only be appended inside the block of tool results that
/// directly follows the assistant message declaring its id, and at most once.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the most recent entry is a tool result
    pub fn ends_with_tool_result(&self) -> bool {
        self.last().is_some_and(Message::is_tool_result)
    }

    /// Append a message, enforcing the tool-result placement rule
    pub fn push(&mut self, message: Message) -> Result<(), HistoryError> {
        if let Message::ToolResult { tool_call_id, .. } = &message {
            self.check_tool_result(tool_call_id)?;
        }
        self.messages.push(message);
        Ok(())
    }

    fn check_tool_result(&self, id: &str) -> Result<(), HistoryError> {
        let mut answered = Vec::new();
        for message in self.messages.iter().rev() {
            match message {
                Message::ToolResult { tool_call_id, .. } => answered.push(tool_call_id.as_str()),
                Message::Assistant { tool_calls, .. } => {
                    if !tool_calls.iter().any(|call| call.id == id) {
                        return Err(HistoryError::UnknownToolCall(id.to_string()));
                    }
                    if answered.contains(&id) {
                        return Err(HistoryError::DuplicateToolResult(id.to_string()));
                    }
                    return Ok(());
                }
                Message::User { .. } => break,
            }
        }
        Err(HistoryError::NoPrecedingAssistant(id.to_string()))
    }
}

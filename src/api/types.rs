//! Socket frame types

use crate::state_machine::LifecycleEvent;
use serde::Serialize;

/// Tagged JSON frame pushed to the browser: `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsFrame {
    TextChunk(String),
    ToolCallStart { name: String, arguments: String },
    ToolCallResult(String),
    ToolCallError(String),
    Error(String),
    End,
    System(String),
    ToolCallsUpdate(Vec<ToolCallView>),
}

impl From<LifecycleEvent> for WsFrame {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::TextChunk { text } => WsFrame::TextChunk(text),
            LifecycleEvent::ToolCallStart { name, arguments } => {
                WsFrame::ToolCallStart { name, arguments }
            }
            LifecycleEvent::ToolCallResult { text } => WsFrame::ToolCallResult(text),
            LifecycleEvent::ToolCallError { message } => WsFrame::ToolCallError(message),
            LifecycleEvent::StreamError { message } => WsFrame::Error(message),
            LifecycleEvent::TurnEnd => WsFrame::End,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallView {
    pub name: String,
    pub arguments: String,
    pub status: ToolCallStatus,
    pub result: String,
}

/// Tool calls of the current query, as the browser renders them
#[derive(Debug, Default)]
pub struct ToolCallsView {
    calls: Vec<ToolCallView>,
}

impl ToolCallsView {
    pub fn reset(&mut self) {
        self.calls.clear();
    }

    /// Fold one event; returns whether the view changed
    pub fn apply(&mut self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::ToolCallStart { name, arguments } => {
                self.calls.push(ToolCallView {
                    name: name.clone(),
                    arguments: arguments.clone(),
                    status: ToolCallStatus::Processing,
                    result: String::new(),
                });
                true
            }
            LifecycleEvent::ToolCallResult { text } => {
                self.settle(ToolCallStatus::Completed, text)
            }
            LifecycleEvent::ToolCallError { message } => {
                self.settle(ToolCallStatus::Error, message)
            }
            _ => false,
        }
    }

    fn settle(&mut self, status: ToolCallStatus, result: &str) -> bool {
        let Some(call) = self
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.status == ToolCallStatus::Processing)
        else {
            return false;
        };
        call.status = status;
        result.clone_into(&mut call.result);
        true
    }

    #[cfg(test)]
    pub fn calls(&self) -> &[ToolCallView] {
        &self.calls
    }

    pub fn snapshot(&self) -> WsFrame {
        WsFrame::ToolCallsUpdate(self.calls.clone())
    }
}

//! Mock implementations for testing
//!
//! These mocks enable orchestrator testing without network or child processes.

use super::traits::*;
use crate::llm::{ChatRequest, ChatTransport, LineStream, LlmError, ToolDefinition};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ============================================================================
// Stream line builders
// ============================================================================

pub const SSE_DONE: &str = "data: [DONE]";

/// Data line carrying one text fragment
pub fn sse_text(fragment: &str) -> String {
    format!(
        "data: {}",
        json!({"choices": [{"delta": {"content": fragment}}]})
    )
}

/// Data line carrying one tool-call fragment
pub fn sse_tool_call(
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
) -> String {
    let mut call = json!({"index": index, "function": {}});
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    if let Some(name) = name {
        call["function"]["name"] = json!(name);
    }
    if let Some(arguments) = arguments {
        call["function"]["arguments"] = json!(arguments);
    }
    format!(
        "data: {}",
        json!({"choices": [{"delta": {"tool_calls": [call]}}]})
    )
}

// ============================================================================
// Mock Chat Transport
// ============================================================================

enum Script {
    Lines(Vec<Result<Vec<u8>, LlmError>>),
    /// Lines followed by a stream that never ends
    Stalled(Vec<String>),
    Refused(LlmError),
}

/// Mock transport that replays queued line scripts, one per turn
pub struct MockChatTransport {
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<ChatRequest>>,
}

#[allow(dead_code)]
impl MockChatTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a complete turn
    pub fn queue_lines<S: Into<String>>(&self, lines: impl IntoIterator<Item = S>) {
        let lines = lines.into_iter().map(|l| Ok(l.into().into_bytes())).collect();
        self.scripts.lock().unwrap().push_back(Script::Lines(lines));
    }

    /// Queue a complete turn given as raw wire bytes
    pub fn queue_raw(&self, lines: impl IntoIterator<Item = Vec<u8>>) {
        let lines = lines.into_iter().map(Ok).collect();
        self.scripts.lock().unwrap().push_back(Script::Lines(lines));
    }

    /// Queue a turn whose connection breaks after the given lines
    pub fn queue_broken<S: Into<String>>(
        &self,
        lines: impl IntoIterator<Item = S>,
        error: LlmError,
    ) {
        let mut items: Vec<_> = lines
            .into_iter()
            .map(|l| Ok(l.into().into_bytes()))
            .collect();
        items.push(Err(error));
        self.scripts.lock().unwrap().push_back(Script::Lines(items));
    }

    /// Queue a turn that delivers the given lines and then hangs
    pub fn queue_stalled<S: Into<String>>(&self, lines: impl IntoIterator<Item = S>) {
        let lines = lines.into_iter().map(Into::into).collect();
        self.scripts.lock().unwrap().push_back(Script::Stalled(lines));
    }

    /// Queue a turn the endpoint refuses to open
    pub fn queue_error(&self, error: LlmError) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Refused(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MockChatTransport {
    async fn stream_completion(&self, request: &ChatRequest) -> Result<LineStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Lines(lines)) => Ok(Box::pin(stream::iter(lines))),
            Some(Script::Stalled(lines)) => Ok(Box::pin(
                stream::iter(lines.into_iter().map(|l| Ok(l.into_bytes())))
                    .chain(stream::pending()),
            )),
            Some(Script::Refused(error)) => Err(error),
            None => Err(LlmError::network("No mock stream queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Tool Session
// ============================================================================

enum Behavior {
    Reply(ToolContent),
    Fail(String),
    Hang,
}

/// Mock tool session with predefined outputs
pub struct MockToolSession {
    behaviors: HashMap<String, Behavior>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool calls
    pub calls: Mutex<Vec<(String, Value)>>,
}

#[allow(dead_code)]
impl MockToolSession {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            definitions: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_behavior(mut self, name: impl Into<String>, behavior: Behavior) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: json!({ "type": "object", "properties": {} }),
        });
        self.behaviors.insert(name, behavior);
        self
    }

    /// Add a tool with a predefined output
    pub fn with_tool(self, name: impl Into<String>, output: ToolContent) -> Self {
        self.with_behavior(name, Behavior::Reply(output))
    }

    /// Add a tool that always fails
    pub fn with_failure(self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.with_behavior(name, Behavior::Fail(message.into()))
    }

    /// Add a tool that never returns
    pub fn with_hanging_tool(self, name: impl Into<String>) -> Self {
        self.with_behavior(name, Behavior::Hang)
    }

    /// Get recorded calls
    pub fn recorded_calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockToolSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSession for MockToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolInvocationError> {
        Ok(self.definitions.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolContent, ToolInvocationError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        match self.behaviors.get(name) {
            Some(Behavior::Reply(content)) => Ok(content.clone()),
            Some(Behavior::Fail(message)) => Err(ToolInvocationError::Failed(message.clone())),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(ToolInvocationError::UnknownTool(name.to_string())),
        }
    }
}

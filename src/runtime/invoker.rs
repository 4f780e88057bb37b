//! Tool invocation for finalized tool calls

use super::traits::{ToolContent, ToolInvocationError, ToolSession};
use super::{ConsumerGone, EventSink};
use crate::llm::ToolCallRef;
use crate::state_machine::LifecycleEvent;
use serde_json::Value;

/// Audit record of one resolved tool call. Observability only; never part of
/// the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub name: String,
    pub raw_arguments: String,
    /// Normalized result text, or the surfaced error message
    pub result_text: String,
    pub success: bool,
}

/// Runs tool calls against a tool-execution session
pub struct ToolInvoker<T: ToolSession> {
    session: T,
}

impl<T: ToolSession> ToolInvoker<T> {
    pub fn new(session: T) -> Self {
        Self { session }
    }

    #[cfg(test)]
    pub fn session(&self) -> &T {
        &self.session
    }

    /// Invoke one call and normalize its result
    pub async fn invoke(&self, call: &ToolCallRef) -> Result<ToolOutcome, ToolInvocationError> {
        let arguments = parse_arguments(&call.arguments);
        let content = self.session.call_tool(&call.name, arguments).await?;
        Ok(ToolOutcome {
            name: call.name.clone(),
            raw_arguments: call.arguments.clone(),
            result_text: normalize_content(content),
            success: true,
        })
    }

    /// Resolve one call end to end: announce it, invoke it, report the result.
    ///
    /// The invocation is abandoned as soon as the event consumer goes away.
    pub async fn resolve(
        &self,
        call: &ToolCallRef,
        sink: &EventSink,
    ) -> Result<ToolOutcome, ConsumerGone> {
        sink.emit(LifecycleEvent::ToolCallStart {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
        .await?;

        let result = tokio::select! {
            result = self.invoke(call) => result,
            () = sink.closed() => return Err(ConsumerGone),
        };

        match result {
            Ok(outcome) => {
                tracing::info!(tool = %call.name, id = %call.id, "Tool call completed");
                sink.emit(LifecycleEvent::ToolCallResult {
                    text: outcome.result_text.clone(),
                })
                .await?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
                let message = format!("Tool call failed: {e}");
                sink.emit(LifecycleEvent::ToolCallError {
                    message: message.clone(),
                })
                .await?;
                Ok(ToolOutcome {
                    name: call.name.clone(),
                    raw_arguments: call.arguments.clone(),
                    result_text: message,
                    success: false,
                })
            }
        }
    }
}

/// Parse the argument payload; anything that is not valid JSON is passed
/// through as the raw string.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Tool arguments are not JSON, passing raw string");
        Value::String(raw.to_string())
    })
}

/// Reduce a tool payload to plain text
pub fn normalize_content(content: ToolContent) -> String {
    let text = match content {
        ToolContent::Text { text } => text,
        ToolContent::Json(value) => json_text(value),
    };
    unescape(&text)
}

fn json_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => Value::Object(map).to_string(),
        },
        Value::Array(items) => items
            .into_iter()
            .map(json_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Undo escapes that survive double encoding on the wire
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\'", "'")
}

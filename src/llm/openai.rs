//! `OpenAI`-compatible streaming chat-completions transport

use super::types::{ChatRequest, Message, ToolDefinition};
use super::{ChatTransport, LineStream, LlmError};
use crate::config::ChatConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::io::StreamReader;

/// Maximum length of a single event line before the stream is aborted
const MAX_LINE: usize = 16 * 1024 * 1024; // 16 MiB

/// Streaming transport for `OpenAI`-compatible chat endpoints
pub struct HttpChatTransport {
    client: Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f32,
    response_timeout: Duration,
}

impl HttpChatTransport {
    pub fn new(config: &ChatConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(config.response_timeout)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            url: config.api_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            response_timeout: config.response_timeout,
        })
    }

    fn translate_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let messages = request.messages.iter().map(translate_message).collect();

        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t: &ToolDefinition| OpenAITool {
                    r#type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        });
        let tool_choice = tools.as_ref().map(|_| "auto".to_string());

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            tools,
            tool_choice,
            stream: true,
        }
    }
}

fn translate_message(message: &Message) -> OpenAIMessage {
    match message {
        Message::User { text } => OpenAIMessage {
            role: "user".to_string(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { text, tool_calls } => OpenAIMessage {
            role: "assistant".to_string(),
            // Providers reject an empty string alongside tool calls
            content: if text.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(text.clone())
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .iter()
                        .map(|call| OpenAIToolCall {
                            id: call.id.clone(),
                            r#type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: None,
        },
        Message::ToolResult { tool_call_id, text } => OpenAIMessage {
            role: "tool".to_string(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

fn classify_send_error(e: &reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        LlmError::network(format!("Connection failed: {e}"))
    } else {
        LlmError::unknown(format!("Request failed: {e}"))
    }
}

/// Split a streaming response body into lines
fn into_lines(response: reqwest::Response) -> LineStream {
    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    frame_lines(StreamReader::new(bytes))
}

/// Frame raw bytes on newlines. Lines are left undecoded so a bad payload
/// only costs its own line.
fn frame_lines<R>(body: R) -> LineStream
where
    R: AsyncRead + Send + 'static,
{
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE);
    let lines = FramedRead::new(body, codec).map(|line| {
        line.map(|bytes| bytes.to_vec())
            .map_err(|e| LlmError::network(format!("Stream read error: {e}")))
    });
    Box::pin(lines)
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn stream_completion(&self, request: &ChatRequest) -> Result<LineStream, LlmError> {
        let body = self.translate_request(request);

        let send = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        // Only the response head is bounded; the body may stream for as long as it needs
        let response = tokio::time::timeout(self.response_timeout, send)
            .await
            .map_err(|_| {
                LlmError::network(format!(
                    "No response within {}s",
                    self.response_timeout.as_secs()
                ))
            })?
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
                .map_or(body, |resp| resp.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        Ok(into_lines(response))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

//! Chat-completion transport abstraction
//!
//! The engine only needs a capability that turns a [`ChatRequest`] into a
//! stream of raw server-sent-event lines. Decoding and accumulation of that
//! stream live in [`decoder`] and [`accumulator`].

pub mod accumulator;
pub mod decoder;
mod error;
mod openai;
mod types;

#[cfg(test)]
mod proptests;

pub use accumulator::{DeltaAccumulator, TurnOutput};
pub use decoder::decode_stream;
pub use error::{LlmError, LlmErrorKind};
pub use openai::HttpChatTransport;
pub use types::*;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Raw lines of one streamed response, undecoded and without their
/// terminator. Ends at connection close.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LlmError>> + Send>>;

/// Common interface for streaming chat endpoints
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streaming completion for the given history and optional tool schema
    async fn stream_completion(&self, request: &ChatRequest) -> Result<LineStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn stream_completion(&self, request: &ChatRequest) -> Result<LineStream, LlmError> {
        (**self).stream_completion(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for chat transports
pub struct LoggingTransport {
    inner: Arc<dyn ChatTransport>,
    model_id: String,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn ChatTransport>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ChatTransport for LoggingTransport {
    async fn stream_completion(&self, request: &ChatRequest) -> Result<LineStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream_completion(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    tools_enabled = request.tools_enabled(),
                    "Chat stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Chat stream failed to open"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

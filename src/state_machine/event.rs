//! Lifecycle events exposed to transports

/// The only artifact the engine hands to a presentation layer.
///
/// Delivered as an ordered, single-pass sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    TextChunk { text: String },
    ToolCallStart { name: String, arguments: String },
    ToolCallResult { text: String },
    ToolCallError { message: String },
    StreamError { message: String },
    TurnEnd,
}

impl LifecycleEvent {
    pub fn text(text: impl Into<String>) -> Self {
        LifecycleEvent::TextChunk { text: text.into() }
    }

    pub fn stream_error(message: impl Into<String>) -> Self {
        LifecycleEvent::StreamError {
            message: message.into(),
        }
    }
}

//! Server-sent event decoding for streamed chat completions
//!
//! Turns the raw lines produced by a [`ChatTransport`](super::ChatTransport)
//! into a lazy sequence of typed [`StreamChunk`]s. Keep-alive and comment
//! lines are dropped, `[DONE]` ends the sequence, and payloads that do not
//! parse are skipped rather than failing the turn.

use super::{LineStream, LlmError};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Decoded chunks for one turn. Finite, single pass.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// One server-sent event payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Fragment of a tool call, identified by its stream index
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl StreamChunk {
    /// Chunk carrying a single text fragment
    #[cfg(test)]
    pub fn text(fragment: impl Into<String>) -> Self {
        Self::from_delta(ChunkDelta {
            content: Some(fragment.into()),
            tool_calls: None,
        })
    }

    /// Chunk carrying a single tool-call fragment
    #[cfg(test)]
    pub fn tool_call(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        Self::from_delta(ChunkDelta {
            content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index: Some(index),
                id: id.map(str::to_string),
                function: Some(FunctionDelta {
                    name: name.map(str::to_string),
                    arguments: arguments.map(str::to_string),
                }),
            }]),
        })
    }

    #[cfg(test)]
    fn from_delta(delta: ChunkDelta) -> Self {
        Self {
            choices: vec![ChunkChoice { delta: Some(delta) }],
        }
    }

    /// Deltas of every choice, in order
    pub fn deltas(&self) -> impl Iterator<Item = &ChunkDelta> {
        self.choices.iter().filter_map(|c| c.delta.as_ref())
    }
}

/// Outcome of decoding a single line
#[derive(Debug)]
pub enum DecodedLine {
    Chunk(StreamChunk),
    /// Not a data line (keep-alive, comment, `event:` field, blank separator)
    Ignored,
    /// Data line whose payload is not a valid chunk; tolerated
    Malformed(String),
    /// End sentinel
    Done,
    /// Provider reported an error inside the stream
    Error(LlmError),
}

/// Decode one raw line
pub fn decode_line(line: &str) -> DecodedLine {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return DecodedLine::Ignored;
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return DecodedLine::Done;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return DecodedLine::Malformed(e.to_string()),
    };

    if let Some(message) = in_band_error(&value) {
        return DecodedLine::Error(LlmError::in_band(message));
    }

    match serde_json::from_value::<StreamChunk>(value) {
        Ok(chunk) => DecodedLine::Chunk(chunk),
        Err(e) => DecodedLine::Malformed(e.to_string()),
    }
}

fn in_band_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

/// Decode one raw line as received from the wire. Bytes that are not UTF-8
/// make the line malformed.
pub fn decode_raw_line(line: &[u8]) -> DecodedLine {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => decode_line(text),
        Err(e) => DecodedLine::Malformed(e.to_string()),
    }
}

/// Lazily decode a line stream into chunks.
///
/// The sequence ends at the `[DONE]` sentinel, at the end of the source, or
/// right after yielding the first error. The source is dropped as soon as the
/// sequence ends.
pub fn decode_stream(lines: LineStream) -> ChunkStream {
    let chunks = stream::unfold(Some(lines), |source| async move {
        let mut lines = source?;
        loop {
            match lines.next().await {
                None => return None,
                Some(Err(e)) => return Some((Err(e), None)),
                Some(Ok(line)) => match decode_raw_line(&line) {
                    DecodedLine::Chunk(chunk) => return Some((Ok(chunk), Some(lines))),
                    DecodedLine::Done => return None,
                    DecodedLine::Error(e) => return Some((Err(e), None)),
                    DecodedLine::Ignored => {}
                    DecodedLine::Malformed(reason) => {
                        tracing::debug!(reason = %reason, "Skipping malformed stream event");
                    }
                },
            }
        }
    });
    Box::pin(chunks)
}

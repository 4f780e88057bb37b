//! Delta accumulation for a single streamed turn
//!
//! Folds decoded chunks into the growing assistant text and an index-keyed
//! arena of in-progress tool calls. Text is forwarded as soon as it arrives;
//! tool-call fragments are silent until the turn is finalized.

use super::decoder::{StreamChunk, ToolCallDelta};
use super::types::ToolCallRef;
use crate::state_machine::LifecycleEvent;
use std::collections::{BTreeMap, HashSet};

/// Tool call under construction. Lives in the accumulator's arena under its
/// stream index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRecord {
    fn merge(&mut self, delta: &ToolCallDelta) {
        if self.id.is_none() {
            if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
                self.id = Some(id.to_string());
            }
        }
        if let Some(function) = &delta.function {
            if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                name.clone_into(&mut self.name);
            }
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }

    /// Freeze the record. Calls without a stream-supplied id get a placeholder
    /// so the assistant message and its tool result agree.
    fn finalize(self) -> ToolCallRef {
        ToolCallRef {
            id: self
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Completed output of one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutput {
    pub text: String,
    /// Finalized calls in ascending stream-index order
    pub tool_calls: Vec<ToolCallRef>,
}

/// Accumulator state for one turn
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    records: BTreeMap<usize, ToolCallRecord>,
    last_index: Option<usize>,
    ignore_tool_calls: bool,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator for a turn where tool invocation is disabled; tool-call
    /// fragments are dropped.
    pub fn text_only() -> Self {
        Self {
            ignore_tool_calls: true,
            ..Self::default()
        }
    }

    /// Fold one chunk, returning the events to forward immediately
    pub fn fold(&mut self, chunk: &StreamChunk) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();

        for delta in chunk.deltas() {
            if let Some(fragment) = delta.content.as_deref().filter(|f| !f.is_empty()) {
                self.text.push_str(fragment);
                events.push(LifecycleEvent::text(fragment));
            }

            if self.ignore_tool_calls {
                continue;
            }
            for call in delta.tool_calls.iter().flatten() {
                let index = self.resolve_index(call);
                self.records.entry(index).or_default().merge(call);
                self.last_index = Some(index);
            }
        }

        events
    }

    fn resolve_index(&self, call: &ToolCallDelta) -> usize {
        if let Some(index) = call.index {
            return index;
        }
        let starts_new = call.id.as_deref().is_some_and(|id| !id.is_empty());
        match (starts_new, self.records.keys().next_back()) {
            (true, Some(&highest)) => highest
                .checked_add(1)
                .or(self.last_index)
                .unwrap_or(highest),
            (false, _) => self.last_index.unwrap_or(0),
            (true, None) => 0,
        }
    }

    /// Freeze the turn's state. Ids are unique across the finalized calls;
    /// a repeated id is replaced by a placeholder.
    pub fn finish(self) -> TurnOutput {
        let mut seen = HashSet::new();
        let tool_calls = self
            .records
            .into_values()
            .map(|mut record| {
                if let Some(id) = record.id.take() {
                    if seen.contains(&id) {
                        tracing::warn!(id = %id, "Repeated tool call id in stream, replacing");
                    } else {
                        record.id = Some(id);
                    }
                }
                let call = record.finalize();
                seen.insert(call.id.clone());
                call
            })
            .collect();

        TurnOutput {
            text: self.text,
            tool_calls,
        }
    }
}

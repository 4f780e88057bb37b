//! Property-based tests for stream decoding and delta accumulation
//!
//! These tests verify that reconstruction is independent of how the
//! provider happens to fragment its output:
//! - Arbitrary split points rebuild the same text and arguments
//! - Interleaved tool-call indices finalize in ascending index order
//! - Malformed lines never change the reconstructed text

use super::accumulator::{DeltaAccumulator, TurnOutput};
use super::decoder::{decode_stream, StreamChunk};
use super::{LineStream, LlmError};
use crate::state_machine::LifecycleEvent;
use futures::{stream, StreamExt};
use proptest::prelude::*;

// ============================================================================
// Strategies and helpers
// ============================================================================

/// Text that survives a JSON round trip unchanged
fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.!?,°]{0,40}"
}

/// Argument payload, serialized the way providers stream it
fn arb_arguments() -> impl Strategy<Value = String> {
    proptest::collection::btree_map("[a-z_]{1,8}", "[a-zA-Z0-9 ]{0,20}", 0..4)
        .prop_map(|m| serde_json::to_string(&m).unwrap())
}

/// Split `s` into consecutive pieces at the given cut points (char offsets)
fn split_at_cuts(s: &str, cuts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let mut points: Vec<usize> = cuts.iter().map(|c| c % chars.len()).collect();
    points.push(0);
    points.push(chars.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| chars[w[0]..w[1]].iter().collect())
        .collect()
}

fn fold_all(acc: &mut DeltaAccumulator, chunks: &[StreamChunk]) -> Vec<LifecycleEvent> {
    chunks.iter().flat_map(|c| acc.fold(c)).collect()
}

fn streamed_text(events: &[LifecycleEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::TextChunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn sse_line(chunk_json: &serde_json::Value) -> String {
    format!("data: {chunk_json}")
}

fn decode_all(lines: Vec<String>) -> TurnOutput {
    let source: LineStream = Box::pin(stream::iter(
        lines.into_iter().map(|l| Ok::<_, LlmError>(l.into_bytes())),
    ));
    let chunks: Vec<_> = futures::executor::block_on(decode_stream(source).collect::<Vec<_>>());
    let mut acc = DeltaAccumulator::new();
    for chunk in chunks {
        acc.fold(&chunk.unwrap());
    }
    acc.finish()
}

// ============================================================================
// Split-point independence
// ============================================================================

proptest! {
    /// Leading text, one tool call, trailing text: any fragmentation rebuilds
    /// the same text and one complete call
    #[test]
    fn prop_split_points_do_not_matter(
        head in arb_text(),
        tail in arb_text(),
        name in "[a-z_]{3,15}",
        arguments in arb_arguments(),
        head_cuts in proptest::collection::vec(any::<usize>(), 0..5),
        arg_cuts in proptest::collection::vec(any::<usize>(), 0..8),
        tail_cuts in proptest::collection::vec(any::<usize>(), 0..5),
    ) {
        let mut chunks: Vec<StreamChunk> = split_at_cuts(&head, &head_cuts)
            .into_iter()
            .map(StreamChunk::text)
            .collect();
        chunks.push(StreamChunk::tool_call(0, Some("call_0"), Some(name.as_str()), None));
        chunks.extend(
            split_at_cuts(&arguments, &arg_cuts)
                .iter()
                .map(|piece| StreamChunk::tool_call(0, None, None, Some(piece.as_str()))),
        );
        chunks.extend(split_at_cuts(&tail, &tail_cuts).into_iter().map(StreamChunk::text));

        let mut acc = DeltaAccumulator::new();
        let events = fold_all(&mut acc, &chunks);
        let out = acc.finish();

        let expected_text = format!("{head}{tail}");
        prop_assert_eq!(&out.text, &expected_text);
        prop_assert_eq!(streamed_text(&events), expected_text);
        prop_assert_eq!(out.tool_calls.len(), 1);
        prop_assert_eq!(out.tool_calls[0].id.as_str(), "call_0");
        prop_assert_eq!(&out.tool_calls[0].name, &name);
        prop_assert_eq!(&out.tool_calls[0].arguments, &arguments);
    }
}

// ============================================================================
// Interleaving independence
// ============================================================================

proptest! {
    /// Fragments of several calls, interleaved arbitrarily but in order per
    /// call, finalize sorted by index with exact arguments
    #[test]
    fn prop_interleaved_indices_finalize_in_order(
        calls in proptest::collection::vec(
            ("[a-z_]{3,12}", arb_arguments(), proptest::collection::vec(any::<usize>(), 0..4)),
            1..5,
        ),
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        // Per-call fragment queues; the first fragment carries id and name
        let mut queues: Vec<std::collections::VecDeque<StreamChunk>> = calls
            .iter()
            .enumerate()
            .map(|(index, (name, arguments, cuts))| {
                let id = format!("call_{index}");
                let mut queue = std::collections::VecDeque::new();
                queue.push_back(StreamChunk::tool_call(index, Some(id.as_str()), Some(name.as_str()), None));
                for piece in split_at_cuts(arguments, cuts) {
                    queue.push_back(StreamChunk::tool_call(index, None, None, Some(piece.as_str())));
                }
                queue
            })
            .collect();

        let mut chunks = Vec::new();
        let mut pick = picks.iter().cycle();
        while queues.iter().any(|q| !q.is_empty()) {
            let live: Vec<usize> = (0..queues.len()).filter(|i| !queues[*i].is_empty()).collect();
            let chosen = live[pick.next().copied().unwrap_or(0) % live.len()];
            if let Some(chunk) = queues[chosen].pop_front() {
                chunks.push(chunk);
            }
        }

        let mut acc = DeltaAccumulator::new();
        let events = fold_all(&mut acc, &chunks);
        prop_assert!(events.is_empty(), "tool fragments must not emit events");

        let out = acc.finish();
        prop_assert_eq!(out.tool_calls.len(), calls.len());
        for (index, (call, (name, arguments, _))) in out.tool_calls.iter().zip(&calls).enumerate() {
            prop_assert_eq!(&call.id, &format!("call_{index}"));
            prop_assert_eq!(&call.name, name);
            prop_assert_eq!(&call.arguments, arguments);
        }
    }
}

// ============================================================================
// Malformed-line tolerance
// ============================================================================

proptest! {
    /// Garbage data lines and keep-alives among valid chunks change nothing
    #[test]
    fn prop_malformed_lines_are_skipped(
        fragments in proptest::collection::vec(arb_text(), 0..8),
        garbage in proptest::collection::vec(
            prop_oneof![
                Just("data: {".to_string()),
                Just("data: not json".to_string()),
                Just(": keep-alive".to_string()),
                Just(String::new()),
                Just("event: ping".to_string()),
                Just("data: [1, 2]".to_string()),
            ],
            0..8,
        ),
        positions in proptest::collection::vec(any::<usize>(), 8),
    ) {
        let mut lines: Vec<String> = fragments
            .iter()
            .map(|f| sse_line(&serde_json::json!({"choices": [{"delta": {"content": f}}]})))
            .collect();
        for (junk, pos) in garbage.into_iter().zip(positions.iter().cycle()) {
            let at = pos % (lines.len() + 1);
            lines.insert(at, junk);
        }
        lines.push("data: [DONE]".to_string());
        lines.push(sse_line(&serde_json::json!({"choices": [{"delta": {"content": "after"}}]})));

        let out = decode_all(lines);
        prop_assert_eq!(out.text, fragments.concat());
        prop_assert!(out.tool_calls.is_empty());
    }
}

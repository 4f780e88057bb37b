//! Websocket chat sessions
//!
//! Each connection owns one orchestrator and one set of MCP servers. Queries
//! on a connection are processed one at a time, in arrival order. The socket
//! keeps being read while a query runs, so a client that leaves mid-query
//! releases the query straight away.

use super::types::{ToolCallsView, WsFrame};
use super::AppState;
use crate::llm::ChatTransport;
use crate::runtime::{ConversationOrchestrator, EventSink, ToolSession};
use crate::tools::ToolRegistry;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{future, Future, Sink, SinkExt, Stream, StreamExt};
use std::collections::VecDeque;
use thiserror::Error;

/// Why a query stopped before its last frame was delivered
#[derive(Debug, Error, PartialEq, Eq)]
enum QueryAborted {
    #[error("failed to send frame")]
    SendFailed,
    #[error("client disconnected")]
    ClientGone,
}

#[allow(clippy::unused_async)]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(frame: &WsFrame) -> Result<Message, axum::Error> {
    serde_json::to_string(frame)
        .map(Message::Text)
        .map_err(axum::Error::new)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let AppState {
        transport, servers, ..
    } = state;
    let connection = uuid::Uuid::new_v4();
    tracing::info!(%connection, "Socket connected");

    let (sender, mut receiver) = socket.split();
    let mut frames = sender.with(|frame: WsFrame| future::ready(encode(&frame)));

    let (registry, failures) = ToolRegistry::connect_scripts(&servers).await;
    for (script, e) in failures {
        let notice = WsFrame::System(format!("Failed to connect {}: {e}", script.display()));
        if frames.send(notice).await.is_err() {
            return;
        }
    }

    let mut orchestrator =
        match ConversationOrchestrator::connect(transport, registry).await {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                tracing::error!(%connection, error = %e, "Failed to start chat session");
                let _ = frames
                    .send(WsFrame::Error(format!("Failed to start chat session: {e}")))
                    .await;
                let _ = frames.close().await;
                return;
            }
        };

    let names: Vec<&str> = orchestrator
        .available_tools()
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    let greeting = WsFrame::System(format!("Available tools: {}", names.join(", ")));
    if frames.send(greeting).await.is_err() {
        return;
    }

    let mut view = ToolCallsView::default();
    let mut pending = VecDeque::new();
    loop {
        let query = match pending.pop_front() {
            Some(query) => query,
            None => match receiver.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(%connection, error = %e, "Socket receive failed");
                    break;
                }
            },
        };
        if query.trim().is_empty() {
            continue;
        }

        let hangup = watch_hangup(&mut receiver, &mut pending);
        if let Err(e) = pump_query(&mut orchestrator, query, &mut view, &mut frames, hangup).await
        {
            tracing::info!(%connection, error = %e, "Query abandoned");
            break;
        }
    }

    let _ = frames.close().await;
    tracing::info!(%connection, "Socket disconnected");
}

/// Read the socket while a query runs. Resolves once the client is gone;
/// queries sent in the meantime are queued in `pending`.
async fn watch_hangup<St>(incoming: &mut St, pending: &mut VecDeque<String>)
where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match incoming.next().await {
            Some(Ok(Message::Text(text))) => pending.push_back(text),
            Some(Ok(Message::Close(_)) | Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    }
}

/// Run one query, pushing its frames to `out`. Every status change of a tool
/// call is followed by a fresh `tool_calls_update` snapshot.
///
/// When `hangup` resolves the event consumer is dropped, which stops the
/// orchestrator at its next suspension point.
async fn pump_query<C, T, S, H>(
    orchestrator: &mut ConversationOrchestrator<C, T>,
    query: String,
    view: &mut ToolCallsView,
    out: &mut S,
    hangup: H,
) -> Result<(), QueryAborted>
where
    C: ChatTransport,
    T: ToolSession,
    S: Sink<WsFrame> + Unpin,
    H: Future<Output = ()>,
{
    view.reset();
    let (sink, mut rx) = EventSink::channel();

    let forward = async move {
        tokio::pin!(hangup);
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                () = &mut hangup => return Err(QueryAborted::ClientGone),
            };
            let Some(event) = event else {
                return Ok(());
            };
            let changed = view.apply(&event);
            out.send(WsFrame::from(event))
                .await
                .map_err(|_| QueryAborted::SendFailed)?;
            if changed {
                out.send(view.snapshot())
                    .await
                    .map_err(|_| QueryAborted::SendFailed)?;
            }
        }
    };

    let ((), delivered) = tokio::join!(orchestrator.process_query(query, sink), forward);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{ToolCallStatus, ToolCallView};
    use crate::runtime::testing::{
        sse_text, sse_tool_call, MockChatTransport, MockToolSession, SSE_DONE,
    };
    use crate::runtime::ToolContent;
    use crate::state_machine::ConvState;
    use futures::channel::mpsc;
    use std::sync::Arc;

    #[tokio::test]
    async fn frames_for_a_tool_query() {
        let transport = Arc::new(MockChatTransport::new());
        transport.queue_lines([
            sse_tool_call(0, Some("c"), Some("get_weather"), Some(r#"{"city":"Paris"}"#)),
            SSE_DONE.to_string(),
        ]);
        transport.queue_lines([sse_text("Sunny."), SSE_DONE.to_string()]);
        let session = MockToolSession::new().with_tool("get_weather", ToolContent::text("18C"));
        let mut orchestrator = ConversationOrchestrator::connect(transport, session)
            .await
            .unwrap();

        let (mut out, frames) = mpsc::unbounded();
        let mut view = ToolCallsView::default();
        pump_query(&mut orchestrator, "weather".to_string(), &mut view, &mut out, future::pending())
            .await
            .unwrap();
        drop(out);
        let frames: Vec<WsFrame> = frames.collect().await;

        let processing = ToolCallView {
            name: "get_weather".to_string(),
            arguments: r#"{"city":"Paris"}"#.to_string(),
            status: ToolCallStatus::Processing,
            result: String::new(),
        };
        let completed = ToolCallView {
            status: ToolCallStatus::Completed,
            result: "18C".to_string(),
            ..processing.clone()
        };
        assert_eq!(
            frames,
            vec![
                WsFrame::ToolCallStart {
                    name: "get_weather".to_string(),
                    arguments: r#"{"city":"Paris"}"#.to_string(),
                },
                WsFrame::ToolCallsUpdate(vec![processing]),
                WsFrame::ToolCallResult("18C".to_string()),
                WsFrame::ToolCallsUpdate(vec![completed]),
                WsFrame::End,
                WsFrame::TextChunk("Sunny.".to_string()),
                WsFrame::End,
            ]
        );
    }

    #[tokio::test]
    async fn view_resets_between_queries() {
        let transport = Arc::new(MockChatTransport::new());
        transport.queue_lines([
            sse_tool_call(0, Some("c"), Some("missing"), Some("{}")),
            SSE_DONE.to_string(),
        ]);
        transport.queue_lines([sse_text("hi"), SSE_DONE.to_string()]);
        let mut orchestrator = ConversationOrchestrator::connect(transport, MockToolSession::new())
            .await
            .unwrap();

        let (mut out, _frames) = mpsc::unbounded();
        let mut view = ToolCallsView::default();
        pump_query(&mut orchestrator, "one".to_string(), &mut view, &mut out, future::pending())
            .await
            .unwrap();
        assert_eq!(view.calls().len(), 1);
        assert_eq!(view.calls()[0].status, ToolCallStatus::Error);

        pump_query(&mut orchestrator, "two".to_string(), &mut view, &mut out, future::pending())
            .await
            .unwrap();
        assert!(view.calls().is_empty());
    }

    #[tokio::test]
    async fn closed_socket_stops_the_query() {
        let transport = Arc::new(MockChatTransport::new());
        transport.queue_stalled([sse_text("partial")]);
        let mut orchestrator =
            ConversationOrchestrator::connect(transport, MockToolSession::new())
                .await
                .unwrap();

        let (mut out, frames) = mpsc::unbounded::<WsFrame>();
        drop(frames);
        let mut view = ToolCallsView::default();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pump_query(&mut orchestrator, "q".to_string(), &mut view, &mut out, future::pending()),
        )
        .await
        .unwrap();
        assert_eq!(result, Err(QueryAborted::SendFailed));
    }

    #[tokio::test]
    async fn client_leaving_during_hanging_tool_releases_the_query() {
        let transport = Arc::new(MockChatTransport::new());
        transport.queue_lines([
            sse_tool_call(0, Some("c"), Some("slow"), Some("{}")),
            SSE_DONE.to_string(),
        ]);
        let session = MockToolSession::new().with_hanging_tool("slow");
        let mut orchestrator = ConversationOrchestrator::connect(transport, session)
            .await
            .unwrap();

        // The frame sink stays open; only the separate hangup signal fires
        let (mut out, frames) = mpsc::unbounded::<WsFrame>();
        let (leave, left) = futures::channel::oneshot::channel::<()>();
        let hangup = async move {
            let _ = left.await;
        };
        let mut view = ToolCallsView::default();

        let query = pump_query(&mut orchestrator, "q".to_string(), &mut view, &mut out, hangup);
        let close = async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = leave.send(());
        };
        let (result, ()) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            tokio::join!(query, close)
        })
        .await
        .unwrap();

        assert_eq!(result, Err(QueryAborted::ClientGone));
        assert_eq!(orchestrator.state(), ConvState::Idle);
        assert_eq!(orchestrator.tool_session().recorded_calls().len(), 1);
        drop(out);
        let frames: Vec<WsFrame> = frames.collect().await;
        assert!(matches!(frames[0], WsFrame::ToolCallStart { .. }));
        assert!(!frames.contains(&WsFrame::End));
    }

    #[tokio::test]
    async fn socket_reader_queues_queries_until_close() {
        let incoming: Vec<Result<Message, axum::Error>> = vec![
            Ok(Message::Text("next".to_string())),
            Ok(Message::Ping(Vec::new())),
            Ok(Message::Close(None)),
            Ok(Message::Text("never".to_string())),
        ];
        let mut incoming = futures::stream::iter(incoming);
        let mut pending = VecDeque::new();
        watch_hangup(&mut incoming, &mut pending).await;
        assert_eq!(pending, VecDeque::from(["next".to_string()]));
    }
}

//! Conversation orchestrator

use super::invoker::{ToolInvoker, ToolOutcome};
use super::traits::{ToolInvocationError, ToolSession};
use super::{ConsumerGone, EventSink};
use crate::llm::{
    decode_stream, ChatRequest, ChatTransport, DeltaAccumulator, LlmError, Message,
    ToolDefinition, TurnOutput,
};
use crate::state_machine::{ConvState, ConversationHistory, LifecycleEvent};
use futures::StreamExt;
use std::future::Future;

/// Drives one session's queries through the two-turn tool protocol.
///
/// Owns the session's history, audit log and tool session. Queries are
/// processed strictly one at a time.
pub struct ConversationOrchestrator<C, T>
where
    C: ChatTransport,
    T: ToolSession,
{
    session_id: String,
    transport: C,
    invoker: ToolInvoker<T>,
    tools: Vec<ToolDefinition>,
    history: ConversationHistory,
    audit: Vec<ToolOutcome>,
    state: ConvState,
}

impl<C, T> ConversationOrchestrator<C, T>
where
    C: ChatTransport,
    T: ToolSession,
{
    pub fn new(transport: C, session: T, tools: Vec<ToolDefinition>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            transport,
            invoker: ToolInvoker::new(session),
            tools,
            history: ConversationHistory::new(),
            audit: Vec::new(),
            state: ConvState::Idle,
        }
    }

    /// Build an orchestrator, fetching the tool schema from the session once
    pub async fn connect(transport: C, session: T) -> Result<Self, ToolInvocationError> {
        let tools = session.list_tools().await?;
        tracing::info!(
            model = %transport.model_id(),
            tools = tools.len(),
            "Tool session connected"
        );
        Ok(Self::new(transport, session, tools))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Every tool call resolved in this session, in resolution order
    pub fn audit(&self) -> &[ToolOutcome] {
        &self.audit
    }

    pub fn state(&self) -> ConvState {
        self.state
    }

    pub fn available_tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    #[cfg(test)]
    pub fn tool_session(&self) -> &T {
        self.invoker.session()
    }

    /// Process one user query, delivering its events through `sink`.
    ///
    /// Returns once the terminal event has been accepted or the consumer is
    /// gone. The orchestrator is `Idle` afterwards in every case.
    #[allow(clippy::needless_pass_by_value)] // dropping the sink ends the event sequence
    pub async fn process_query(&mut self, query: impl Into<String>, sink: EventSink) {
        if let Err(ConsumerGone) = self.run_query(query.into(), &sink).await {
            tracing::info!(
                session = %self.session_id,
                state = self.state.name(),
                "Event consumer gone, abandoning query"
            );
        }
        self.transition(ConvState::Idle);
    }

    /// Process one query, handing each event to `consume` as it is produced.
    ///
    /// Returning `false` from `consume` disconnects the consumer and stops the
    /// query at its next suspension point.
    pub async fn handle_query<F, Fut>(&mut self, query: impl Into<String>, mut consume: F)
    where
        F: FnMut(LifecycleEvent) -> Fut,
        Fut: Future<Output = bool>,
    {
        let (sink, mut rx) = EventSink::channel();
        let forward = async move {
            while let Some(event) = rx.recv().await {
                if !consume(event).await {
                    break;
                }
            }
        };
        tokio::join!(self.process_query(query, sink), forward);
    }

    async fn run_query(&mut self, query: String, sink: &EventSink) -> Result<(), ConsumerGone> {
        tracing::info!(session = %self.session_id, "Processing query");
        self.append(Message::user(query));

        // First turn, tools enabled
        self.transition(ConvState::AwaitingFirstTurn);
        let request = ChatRequest::with_tools(self.history.messages().to_vec(), self.tools.clone());
        let Some(first) = self.stream_turn(&request, DeltaAccumulator::new(), sink).await? else {
            return Ok(());
        };

        let calls = first.tool_calls.clone();
        self.append(Message::assistant(first.text, first.tool_calls));
        if calls.is_empty() {
            return sink.emit(LifecycleEvent::TurnEnd).await;
        }

        // Tool resolution, strictly in stream-index order
        for (done, call) in calls.iter().enumerate() {
            self.transition(ConvState::ResolvingTools {
                remaining: calls.len() - done,
            });
            let outcome = self.invoker.resolve(call, sink).await?;
            if outcome.success {
                self.append(Message::tool_result(&call.id, &outcome.result_text));
            }
            self.audit.push(outcome);
        }
        sink.emit(LifecycleEvent::TurnEnd).await?;

        // Second turn only when at least one call fed a result back
        if self.history.ends_with_tool_result() {
            self.transition(ConvState::AwaitingSecondTurn);
            let request = ChatRequest::text_only(self.history.messages().to_vec());
            let Some(second) = self
                .stream_turn(&request, DeltaAccumulator::text_only(), sink)
                .await?
            else {
                return Ok(());
            };
            if !second.text.is_empty() {
                self.append(Message::assistant(second.text, Vec::new()));
            }
        } else {
            tracing::info!(session = %self.session_id, "No tool call succeeded, skipping second turn");
        }

        sink.emit(LifecycleEvent::TurnEnd).await
    }

    /// Stream one turn to completion, forwarding text as it arrives.
    ///
    /// `Ok(None)` means the turn failed; the `StreamError` has already been
    /// delivered.
    async fn stream_turn(
        &self,
        request: &ChatRequest,
        mut accumulator: DeltaAccumulator,
        sink: &EventSink,
    ) -> Result<Option<TurnOutput>, ConsumerGone> {
        let opened = tokio::select! {
            opened = self.transport.stream_completion(request) => opened,
            () = sink.closed() => return Err(ConsumerGone),
        };
        let lines = match opened {
            Ok(lines) => lines,
            Err(e) => return self.fail_turn(&e, sink).await,
        };

        let mut chunks = decode_stream(lines);
        loop {
            let next = tokio::select! {
                next = chunks.next() => next,
                () = sink.closed() => return Err(ConsumerGone),
            };
            match next {
                None => break,
                Some(Ok(chunk)) => {
                    for event in accumulator.fold(&chunk) {
                        sink.emit(event).await?;
                    }
                }
                Some(Err(e)) => return self.fail_turn(&e, sink).await,
            }
        }

        let output = accumulator.finish();
        tracing::debug!(
            session = %self.session_id,
            text_len = output.text.len(),
            tool_calls = output.tool_calls.len(),
            "Turn complete"
        );
        Ok(Some(output))
    }

    async fn fail_turn(
        &self,
        error: &LlmError,
        sink: &EventSink,
    ) -> Result<Option<TurnOutput>, ConsumerGone> {
        tracing::error!(
            session = %self.session_id,
            kind = error.kind.as_str(),
            error = %error.message,
            "Turn failed"
        );
        sink.emit(LifecycleEvent::stream_error(error.message.clone()))
            .await?;
        Ok(None)
    }

    fn append(&mut self, message: Message) {
        if let Err(e) = self.history.push(message) {
            tracing::error!(session = %self.session_id, error = %e, "Rejected history append");
        }
    }

    fn transition(&mut self, next: ConvState) {
        if self.state != next {
            tracing::debug!(
                session = %self.session_id,
                from = self.state.name(),
                to = next.name(),
                "State transition"
            );
        }
        self.state = next;
    }
}

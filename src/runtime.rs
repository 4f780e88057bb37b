//! Runtime for executing conversations
//!
//! One [`ConversationOrchestrator`] per logical session. Events leave the
//! orchestrator through an [`EventSink`], a one-slot hand-off that holds the
//! engine back until the consumer has accepted the previous event.

mod executor;
mod invoker;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationOrchestrator;
pub use traits::*;

use crate::state_machine::LifecycleEvent;
use thiserror::Error;
use tokio::sync::mpsc;

/// The event consumer went away; the current query is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event consumer disconnected")]
pub struct ConsumerGone;

/// Producer side of a query's event sequence
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<LifecycleEvent>,
}

impl EventSink {
    /// Create a sink and its receiving end. At most one event is in flight.
    pub fn channel() -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Hand one event to the consumer, waiting until it has room for it
    pub async fn emit(&self, event: LifecycleEvent) -> Result<(), ConsumerGone> {
        self.tx.send(event).await.map_err(|_| ConsumerGone)
    }

    /// Resolves once the consumer has gone away
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

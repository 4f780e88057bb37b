//! Conversation state, history and lifecycle events

pub mod event;
pub mod history;
pub mod state;

pub use event::LifecycleEvent;
pub use history::ConversationHistory;
pub use state::ConvState;

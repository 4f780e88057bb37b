//! Conversation state

/// Orchestrator state for one session.
///
/// `Idle -> AwaitingFirstTurn -> ResolvingTools -> AwaitingSecondTurn -> Idle`,
/// with every intermediate state allowed to fall straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvState {
    /// Ready for user input, no pending operations
    #[default]
    Idle,

    /// First turn streaming, tool invocation enabled
    AwaitingFirstTurn,

    /// Resolving the first turn's tool calls in index order
    ResolvingTools {
        /// Calls not yet resolved, including the current one
        remaining: usize,
    },

    /// Summarization turn streaming, tool invocation disabled
    AwaitingSecondTurn,
}

impl ConvState {
    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::AwaitingFirstTurn => "awaiting_first_turn",
            ConvState::ResolvingTools { .. } => "resolving_tools",
            ConvState::AwaitingSecondTurn => "awaiting_second_turn",
        }
    }
}

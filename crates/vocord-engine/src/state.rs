use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Connecting,
    Listening,
    UserSpeaking,
    AssistantSpeaking,
    Reconnecting,
    Error,
    Closed,
}

impl ConversationState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConversationState::Connecting
                | ConversationState::Listening
                | ConversationState::UserSpeaking
                | ConversationState::AssistantSpeaking
                | ConversationState::Reconnecting
        )
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationState::Idle => "Idle",
            ConversationState::Connecting => "Connecting",
            ConversationState::Listening => "Listening",
            ConversationState::UserSpeaking => "UserSpeaking",
            ConversationState::AssistantSpeaking => "AssistantSpeaking",
            ConversationState::Reconnecting => "Reconnecting",
            ConversationState::Error => "Error",
            ConversationState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// Legal state transitions, spelled out so an illegal one is a caught bug
/// rather than a silent corruption.
pub fn is_valid_transition(from: ConversationState, to: ConversationState) -> bool {
    use ConversationState::*;
    matches!(
        (from, to),
        // Session start, including restart after a terminal state
        (Idle | Closed | Error, Connecting)
            | (Connecting, Listening)
            | (Connecting, Error)
            // Turn-taking
            | (Listening, UserSpeaking)
            | (UserSpeaking, Listening)
            | (Listening | UserSpeaking, AssistantSpeaking)
            | (AssistantSpeaking, Listening)
            // Network loss from any active state
            | (
                Listening | UserSpeaking | AssistantSpeaking,
                Reconnecting
            )
            | (Reconnecting, Listening)
            | (Reconnecting, Error)
            // stop() and fatal errors from anywhere active
            | (
                Connecting | Listening | UserSpeaking | AssistantSpeaking | Reconnecting,
                Closed
            )
            | (
                Listening | UserSpeaking | AssistantSpeaking | Reconnecting,
                Error
            )
            | (Idle, Error)
    )
}

/// Owns the current state and enforces the transition table. Every accepted
/// transition is logged; a rejected one is logged at warn and leaves the
/// state untouched.
pub struct StateTracker {
    current: ConversationState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            current: ConversationState::Idle,
        }
    }

    pub fn current(&self) -> ConversationState {
        self.current
    }

    pub fn transition(&mut self, to: ConversationState) -> bool {
        if !is_valid_transition(self.current, to) {
            tracing::warn!("Rejected state transition {} -> {}", self.current, to);
            return false;
        }
        tracing::debug!("State transition {} -> {}", self.current, to);
        self.current = to;
        true
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

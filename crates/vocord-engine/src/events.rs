use vocord_foundation::{AudioError, EngineError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A piece of transcript attached to the running session. Assistant text
/// arrives as streaming partials; user text arrives once, final.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
    pub session_id: String,
}

/// Why a session degraded or died, coarse enough for a caller to decide
/// whether offering a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Network,
    NetworkExhausted,
    AudioPermission,
    AudioDevice,
    Protocol,
    Config,
    Unauthorized,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::NetworkExhausted | ErrorKind::AudioDevice
        )
    }
}

impl From<&EngineError> for ErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::Transport(TransportError::Unauthorized) => ErrorKind::Auth,
            EngineError::Transport(_) => ErrorKind::Network,
            EngineError::Audio(AudioError::PermissionDenied) => ErrorKind::AudioPermission,
            EngineError::Audio(_) => ErrorKind::AudioDevice,
            EngineError::Protocol(_) => ErrorKind::Protocol,
            EngineError::Config(_) | EngineError::SessionActive => ErrorKind::Config,
            EngineError::Unauthorized => ErrorKind::Unauthorized,
            EngineError::WorkerGone => ErrorKind::Network,
        }
    }
}

/// The engine's sole externally observable contract: a single ordered stream
/// of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    SpeechStarted,
    SpeechStopped,
    TranscriptDelta(TranscriptSegment),
    AudioPlaybackStarted,
    AudioPlaybackFinished,
    Error { kind: ErrorKind, detail: String },
}

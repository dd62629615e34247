use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("audio subsystem error: {0}")]
    Audio(#[from] AudioError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("a voice session is already active")]
    SessionActive,

    #[error("voice sessions are not authorized for this account")]
    Unauthorized,

    #[error("engine worker is not running")]
    WorkerGone,
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("device disconnected")]
    DeviceDisconnected,

    #[error("format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("buffer overflow, dropped {count} samples")]
    BufferOverflow { count: usize },

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("fatal audio error: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection rejected: unauthorized")]
    Unauthorized,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed: {0}")]
    Disconnected(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("connection is not open")]
    NotConnected,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => {
                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    TransportError::Unauthorized
                } else {
                    TransportError::Handshake(format!("HTTP {}", status))
                }
            }
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Disconnected("connection closed".into())
            }
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token fetch failed: {0}")]
    FetchFailed(String),

    #[error("token expired")]
    Expired,

    #[error("token rejected by endpoint")]
    Rejected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid VAD configuration: {0}")]
    InvalidVad(String),

    #[error("invalid engine configuration: {0}")]
    InvalidEngine(String),
}

/// How a component should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fetch a fresh token and reconnect.
    RefreshToken,
    /// Hand off to the reconnection supervisor.
    Reconnect,
    /// Retry the failed operation in place.
    Retry,
    /// Log, drop the offending message, keep the session alive.
    DropMessage,
    /// Surface to the caller and halt the session.
    Fatal,
}

impl EngineError {
    pub fn recovery(&self) -> Recovery {
        match self {
            EngineError::Auth(AuthError::Expired) => Recovery::RefreshToken,
            EngineError::Transport(TransportError::ConnectTimeout(_))
            | EngineError::Transport(TransportError::Disconnected(_))
            | EngineError::Transport(TransportError::WebSocket(_)) => Recovery::Reconnect,
            EngineError::Audio(AudioError::DeviceDisconnected)
            | EngineError::Audio(AudioError::DeviceNotFound { .. }) => Recovery::Retry,
            EngineError::Protocol(_) => Recovery::DropMessage,
            _ => Recovery::Fatal,
        }
    }
}

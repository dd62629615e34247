//! The conversation engine: a single worker task that owns the session
//! lifecycle, arbitrates client and server VAD, gates the capture frame
//! stream, drives playback, and supervises reconnection. Callers observe it
//! exclusively through one ordered `ConversationEvent` stream.

pub mod collaborators;
pub mod config;
pub mod conversation;
pub mod events;
pub mod session;
pub mod state;
pub mod supervisor;

pub use collaborators::{
    AllowAllGate, AuthToken, ConversationLogger, EnvTokenProvider, PaywallGate,
    StaticTokenProvider, TokenProvider, TracingConversationLogger,
};
pub use config::EngineConfig;
pub use conversation::{spawn, Collaborators, ConversationHandle};
pub use events::{ConversationEvent, ErrorKind, Role, TranscriptSegment};
pub use session::Session;
pub use state::{ConversationState, StateTracker};
pub use supervisor::ReconnectPolicy;

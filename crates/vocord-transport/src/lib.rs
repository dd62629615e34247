//! Realtime WebSocket transport: wire protocol types, PCM16 payload codec,
//! and the connection client. Exactly one network task owns each socket;
//! everything else talks to it through bounded channels.

pub mod client;
pub mod pcm;
pub mod protocol;

pub use client::{
    InboundEvent, RealtimeConnection, RealtimeTransport, TransportConfig, WsTransport,
};
pub use protocol::{
    ClientEvent, ErrorInfo, ResponseInfo, ServerEvent, SessionConfig, SessionInfo, TurnDetection,
};

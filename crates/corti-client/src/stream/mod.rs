//! Streaming sessions over WebSocket.
//!
//! - [`socket`]: reconnecting transport with a single event receiver
//! - [`session`]: configuration handshake on top of the socket
//! - [`headers`]: header pairs flattened into subprotocol tokens for proxies
//! - [`protocol`]: JSON message envelope

pub mod headers;
pub mod protocol;
pub mod session;
pub mod socket;

pub use headers::{HeaderEntry, SDK_HEADER_NAMES, encode, encode_protocols, header};
pub use protocol::{ClientMessage, ServerMessageKind, message_kind};
pub use session::{SessionState, StreamSession};
pub use socket::{
    DEFAULT_MAX_RETRIES, NORMAL_CLOSURE, Payload, ReconnectingSocket, SocketConfig, SocketEvent,
    SocketState, SocketTarget,
};

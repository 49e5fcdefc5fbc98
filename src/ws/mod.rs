//! WebSocket signaling relay.
//!
//! - `handshake`: upgrade validation and the accept token
//! - `frame`: binary frame codec
//! - `hub`: rooms of peers and broadcast
//! - `session`: per-peer receive loop

pub mod frame;
pub mod handshake;
pub mod hub;
pub mod session;

pub use frame::FrameError;
pub use handshake::HandshakeError;
pub use hub::SignalingHub;

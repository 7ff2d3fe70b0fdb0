//! RTMP protocol substrate
//!
//! Handshake, chunk (de)serialization, the message model, and the peer type
//! the proxy and stub sessions are built on.

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;
pub mod peer;

pub use chunk::{ChunkDecoder, ChunkEncoder};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{MessageType, RtmpMessage};
pub use peer::RtmpPeer;

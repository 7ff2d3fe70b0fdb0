//! Protocol constants

/// RTMP protocol version byte exchanged in C0/S0
pub const RTMP_VERSION: u8 = 3;

/// Size of the C1/S1/C2/S2 handshake packets
pub const HANDSHAKE_SIZE: usize = 1536;

/// Default RTMP port
pub const DEFAULT_PORT: u16 = 1935;

/// Chunk size both sides start with before any SET_CHUNK_SIZE
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Upper bound accepted for a peer-announced chunk size
pub const MAX_CHUNK_SIZE: u32 = 65536;

/// Chunk stream id reserved for protocol control messages
pub const CSID_PROTOCOL: u32 = 2;

/// Chunk stream id used for invoke/command messages
pub const CSID_INVOKE: u32 = 3;

/// Upper clamp on client-requested buffer length: 4 hours in milliseconds
pub const BUFFERTIME: u32 = 4 * 60 * 60 * 1000;

/// User control event types carried in CONTROL (type 4) messages
pub mod control_event {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const SET_BUFFER_LENGTH: u16 = 3;
    pub const SWF_VERIFY_REQUEST: u16 = 0x1a;
    pub const SWF_VERIFY_RESPONSE: u16 = 0x1b;
}

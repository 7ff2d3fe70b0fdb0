//! Error types
//!
//! All fallible operations in the crate return [`Result`]. Errors from the
//! protocol layers are grouped into sub-enums so callers can match on the
//! layer that failed without caring about the exact cause.

use std::fmt;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error from the socket or an output file
    Io(std::io::Error),

    /// AMF encoding/decoding error
    Amf(AmfError),

    /// Handshake failure
    Handshake(HandshakeError),

    /// Protocol-level error (chunking, framing, command flow)
    Protocol(ProtocolError),

    /// TLS setup or accept failure
    Tls(String),
}

/// AMF0 codec errors
#[derive(Debug, PartialEq, Eq)]
pub enum AmfError {
    /// Buffer ended in the middle of a value
    UnexpectedEof,

    /// Unknown type marker in strict mode
    UnknownMarker(u8),

    /// Object terminated without the end marker
    InvalidObjectEnd,

    /// Reference index out of range
    InvalidReference(u16),

    /// String data was not valid UTF-8
    InvalidUtf8,

    /// Objects/arrays nested deeper than the decoder allows
    NestingTooDeep,
}

/// Handshake errors
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    /// Peer sent an unsupported protocol version
    InvalidVersion(u8),

    /// Peer closed the connection mid-handshake
    Incomplete,
}

/// Chunk stream and message flow errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Chunk header or payload failed to parse
    InvalidChunk(String),

    /// The upstream connect attempt failed
    UpstreamConnect(String),

    /// Readiness wait expired
    Timeout,

    /// Peer closed the connection
    Disconnected,

    /// Recorded FLV payload was internally inconsistent
    CorruptFlv,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Amf(e) => write!(f, "amf error: {}", e),
            Error::Handshake(e) => write!(f, "handshake error: {}", e),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Tls(msg) => write!(f, "tls error: {}", msg),
        }
    }
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            AmfError::UnknownMarker(m) => write!(f, "unknown type marker 0x{:02x}", m),
            AmfError::InvalidObjectEnd => write!(f, "missing object end marker"),
            AmfError::InvalidReference(i) => write!(f, "reference index {} out of range", i),
            AmfError::InvalidUtf8 => write!(f, "invalid utf-8 in string"),
            AmfError::NestingTooDeep => write!(f, "nesting depth limit exceeded"),
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "unsupported version {}", v),
            HandshakeError::Incomplete => write!(f, "connection closed mid-handshake"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunk(msg) => write!(f, "invalid chunk: {}", msg),
            ProtocolError::UpstreamConnect(msg) => write!(f, "upstream connect failed: {}", msg),
            ProtocolError::Timeout => write!(f, "readiness wait timed out"),
            ProtocolError::Disconnected => write!(f, "peer disconnected"),
            ProtocolError::CorruptFlv => write!(f, "corrupted flv payload"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

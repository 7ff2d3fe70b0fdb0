//! RTMP message model
//!
//! A message is the unit the dispatcher and splice engine operate on: a type,
//! a timestamp, a message stream id, and a payload reassembled from one or
//! more chunks. The chunk stream id it arrived on is kept so forwarding can
//! preserve the peer's channel layout.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::{control_event, CSID_PROTOCOL};

/// RTMP message type ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Set chunk size (1)
    SetChunkSize,
    /// Acknowledgement / bytes read report (3)
    BytesRead,
    /// User control (4)
    Control,
    /// Window acknowledgement size (5)
    ServerBw,
    /// Set peer bandwidth (6)
    ClientBw,
    /// Audio data (8)
    Audio,
    /// Video data (9)
    Video,
    /// AMF3 data message (15)
    FlexStream,
    /// AMF3 shared object (16)
    FlexSharedObject,
    /// AMF3 command message (17)
    FlexMessage,
    /// AMF0 data message / metadata (18)
    Info,
    /// AMF0 shared object (19)
    SharedObject,
    /// AMF0 command message (20)
    Invoke,
    /// Aggregate/FLV message (22)
    Flv,
    /// Anything else, forwarded untouched
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => MessageType::SetChunkSize,
            3 => MessageType::BytesRead,
            4 => MessageType::Control,
            5 => MessageType::ServerBw,
            6 => MessageType::ClientBw,
            8 => MessageType::Audio,
            9 => MessageType::Video,
            15 => MessageType::FlexStream,
            16 => MessageType::FlexSharedObject,
            17 => MessageType::FlexMessage,
            18 => MessageType::Info,
            19 => MessageType::SharedObject,
            20 => MessageType::Invoke,
            22 => MessageType::Flv,
            other => MessageType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::SetChunkSize => 1,
            MessageType::BytesRead => 3,
            MessageType::Control => 4,
            MessageType::ServerBw => 5,
            MessageType::ClientBw => 6,
            MessageType::Audio => 8,
            MessageType::Video => 9,
            MessageType::FlexStream => 15,
            MessageType::FlexSharedObject => 16,
            MessageType::FlexMessage => 17,
            MessageType::Info => 18,
            MessageType::SharedObject => 19,
            MessageType::Invoke => 20,
            MessageType::Flv => 22,
            MessageType::Unknown(v) => *v,
        }
    }

    /// Audio, video, metadata or pre-muxed FLV: everything the FLV writer
    /// persists
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageType::Audio | MessageType::Video | MessageType::Info | MessageType::Flv
        )
    }

    /// AMF command carriers the dispatcher decodes
    pub fn is_invoke_like(&self) -> bool {
        matches!(self, MessageType::Invoke | MessageType::FlexMessage)
    }
}

/// A fully reassembled RTMP message
#[derive(Debug, Clone)]
pub struct RtmpMessage {
    pub message_type: MessageType,
    /// Chunk stream the message arrived on (preserved when forwarding)
    pub chunk_stream_id: u32,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    /// Message stream id
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(
        message_type: MessageType,
        chunk_stream_id: u32,
        timestamp: u32,
        stream_id: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            message_type,
            chunk_stream_id,
            timestamp,
            stream_id,
            payload,
        }
    }

    /// Build a SET_CHUNK_SIZE message
    pub fn set_chunk_size(size: u32) -> Self {
        let mut body = BytesMut::with_capacity(4);
        body.put_u32(size);
        Self::new(
            MessageType::SetChunkSize,
            CSID_PROTOCOL,
            0,
            0,
            body.freeze(),
        )
    }

    /// Build a user control message with a single 32-bit argument
    fn control(event: u16, arg: u32) -> Self {
        let mut body = BytesMut::with_capacity(6);
        body.put_u16(event);
        body.put_u32(arg);
        Self::new(MessageType::Control, CSID_PROTOCOL, 0, 0, body.freeze())
    }

    /// Stream Begin for the given message stream
    pub fn stream_begin(stream_id: u32) -> Self {
        Self::control(control_event::STREAM_BEGIN, stream_id)
    }

    /// Stream EOF for the given message stream
    pub fn stream_eof(stream_id: u32) -> Self {
        Self::control(control_event::STREAM_EOF, stream_id)
    }

    /// SWF verification response carrying the HMAC digest
    pub fn swf_verify_response(digest: &[u8; 32]) -> Self {
        let mut body = BytesMut::with_capacity(2 + 32);
        body.put_u16(control_event::SWF_VERIFY_RESPONSE);
        body.put_slice(digest);
        Self::new(MessageType::Control, CSID_PROTOCOL, 0, 0, body.freeze())
    }
}

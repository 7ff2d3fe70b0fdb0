//! FLV tag writer
//!
//! Renders inbound RTMP media messages into the FLV byte stream persisted to
//! disk: one 11-byte tag header + body + 4-byte back-pointer per audio,
//! video or metadata message, and validation/repair of the back-pointer
//! chain for payloads that arrive already FLV-muxed (aggregate messages).
//!
//! FLV tag layout:
//! ```text
//! +--------+-------------+-----------------+-------------+---------+--------------+
//! | Type(1)| DataSize(3) | TS(3) + TSext(1)| StreamID(3) | Data(N) | PrevTagSize  |
//! +--------+-------------+-----------------+-------------+---------+--------------+
//! ```
//! `PrevTagSize` is always `11 + DataSize` of the tag it follows.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::message::{MessageType, RtmpMessage};

/// FLV file header plus the zero `PrevTagSize0`, written once per file
pub const FLV_HEADER: [u8; 13] = [
    b'F', b'L', b'V', 0x01, // signature + version
    0x05, // type flags: audio + video
    0x00, 0x00, 0x00, 0x09, // header size
    0x00, 0x00, 0x00, 0x00, // PrevTagSize0
];

const TAG_HEADER_LEN: usize = 11;
const PREV_TAG_SIZE_LEN: usize = 4;

/// Stateful tag renderer.
///
/// Owns a reusable output buffer and the monotonic timestamp watermark the
/// session tracks; one writer serves all output files of a session.
pub struct FlvWriter {
    buf: BytesMut,
    watermark: u32,
}

impl FlvWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(128 * 1024),
            watermark: 0,
        }
    }

    /// Timestamp of the last rendered tag
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    /// Render one message into the internal buffer and return the bytes to
    /// append to the output file. An empty slice means the message was
    /// skipped (command frames, runt packets, non-media types).
    pub fn render(&mut self, msg: &RtmpMessage) -> Result<&[u8], ProtocolError> {
        self.buf.clear();
        let body = &msg.payload;

        match msg.message_type {
            MessageType::Video => {
                // Video info/command frames never reach the file
                if body.len() == 2 && body[0] & 0xF0 == 0x50 {
                    return Ok(&[]);
                }
                if body.len() <= 5 {
                    tracing::warn!(size = body.len(), "ignoring too small video packet");
                    return Ok(&[]);
                }
                self.render_tag(9, msg.timestamp, body);
            }
            MessageType::Audio => {
                if body.len() <= 1 {
                    tracing::warn!(size = body.len(), "ignoring too small audio packet");
                    return Ok(&[]);
                }
                self.render_tag(8, msg.timestamp, body);
            }
            MessageType::Info => {
                self.render_tag(18, msg.timestamp, body);
            }
            MessageType::Flv => {
                self.render_muxed(body)?;
            }
            _ => return Ok(&[]),
        }

        Ok(&self.buf)
    }

    /// Emit one complete tag: header, body, back-pointer
    fn render_tag(&mut self, tag_type: u8, timestamp: u32, body: &[u8]) {
        self.watermark = timestamp;

        self.buf.reserve(TAG_HEADER_LEN + body.len() + PREV_TAG_SIZE_LEN);
        self.buf.put_u8(tag_type);
        put_be24(&mut self.buf, body.len() as u32);
        put_be24(&mut self.buf, timestamp & 0xFF_FFFF);
        self.buf.put_u8((timestamp >> 24) as u8);
        put_be24(&mut self.buf, 0); // stream id
        self.buf.put_slice(body);
        self.buf.put_u32((TAG_HEADER_LEN + body.len()) as u32);
    }

    /// Pass through a payload that already carries FLV tags, validating each
    /// embedded back-pointer and repairing or appending where the chain is
    /// wrong or missing.
    fn render_muxed(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        self.buf.extend_from_slice(body);

        let mut pos = 0usize;
        while pos + TAG_HEADER_LEN < self.buf.len() {
            let data_size = be24(&self.buf[pos + 1..pos + 4]) as usize;
            let ts = be24(&self.buf[pos + 4..pos + 7]) | ((self.buf[pos + 7] as u32) << 24);
            self.watermark = ts;

            let body_end = pos + TAG_HEADER_LEN + data_size;
            let prev_tag_size = (TAG_HEADER_LEN + data_size) as u32;

            if body_end + PREV_TAG_SIZE_LEN > self.buf.len() {
                if body_end > self.buf.len() {
                    tracing::error!(data_size, "wrong data size, stream corrupted");
                    return Err(ProtocolError::CorruptFlv);
                }
                // Chain ends without a back-pointer: synthesize one
                tracing::warn!("no tagSize found, appending");
                self.buf.truncate(body_end);
                self.buf.put_u32(prev_tag_size);
            } else {
                let stored = u32::from_be_bytes([
                    self.buf[body_end],
                    self.buf[body_end + 1],
                    self.buf[body_end + 2],
                    self.buf[body_end + 3],
                ]);
                if stored != prev_tag_size {
                    self.buf[body_end..body_end + 4]
                        .copy_from_slice(&prev_tag_size.to_be_bytes());
                }
            }

            pos = body_end + PREV_TAG_SIZE_LEN;
        }

        Ok(())
    }
}

impl Default for FlvWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn be24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

fn put_be24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

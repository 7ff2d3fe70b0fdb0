//! Chunk stream codec
//!
//! RTMP multiplexes messages over chunk streams. Each chunk carries a basic
//! header (format + chunk stream id), a message header whose size depends on
//! the format (11/7/3/0 bytes), an optional extended timestamp, and up to
//! `chunk_size` bytes of payload. Messages on different chunk streams
//! interleave freely; the decoder keeps per-chunk-stream scratch state so it
//! can reassemble each one independently.
//!
//! ```text
//! +--------------+----------------+--------------------+--------------+
//! | Basic Header | Message Header | Extended Timestamp | Chunk Data   |
//! | (1-3 bytes)  | (0/3/7/11 B)   | (0 or 4 bytes)     | (<= chunk sz)|
//! +--------------+----------------+--------------------+--------------+
//! ```
//!
//! The decoder consumes only whole chunks from the caller's buffer: when the
//! buffer holds a partial chunk nothing is consumed and `None` is returned,
//! which keeps reads cancel-safe under `select!`.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::DEFAULT_CHUNK_SIZE;
use super::message::{MessageType, RtmpMessage};
use crate::error::ProtocolError;

/// Sentinel in the 24-bit timestamp field meaning "extended timestamp follows"
const EXTENDED_TIMESTAMP: u32 = 0xFFFFFF;

/// Per-chunk-stream scratch state
#[derive(Debug, Default)]
struct ChunkStreamState {
    /// Last absolute timestamp on this chunk stream
    timestamp: u32,
    /// Last timestamp delta (reused by format 2/3 headers)
    delta: u32,
    /// Declared length of the message being assembled
    length: u32,
    /// Message type id
    type_id: u8,
    /// Message stream id
    stream_id: u32,
    /// Whether the last header used an extended timestamp
    extended: bool,
    /// Body accumulated so far
    partial: BytesMut,
}

/// Incremental chunk decoder
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Inbound chunk size negotiated by the peer's SET_CHUNK_SIZE
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size;
    }

    /// Last absolute timestamp observed on a chunk stream
    pub fn channel_timestamp(&self, chunk_stream_id: u32) -> Option<u32> {
        self.streams.get(&chunk_stream_id).map(|s| s.timestamp)
    }

    /// Try to decode one complete message from `buf`.
    ///
    /// Consumes every whole chunk it walks over. Returns `Ok(None)` when the
    /// buffer holds no complete chunk or the walked chunks only partially
    /// fill a message.
    pub fn try_decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<RtmpMessage>, ProtocolError> {
        loop {
            let Some(header) = self.peek_chunk(buf)? else {
                return Ok(None);
            };

            // Whole chunk present: commit
            buf.advance(header.header_len);
            let payload = buf.split_to(header.payload_len);

            let state = self.streams.entry(header.csid).or_default();
            let starting = state.partial.is_empty();

            match header.format {
                0 => {
                    state.timestamp = header.timestamp_field;
                    state.delta = 0;
                    state.length = header.length;
                    state.type_id = header.type_id;
                    state.stream_id = header.stream_id;
                    state.extended = header.extended;
                }
                1 => {
                    state.delta = header.timestamp_field;
                    state.length = header.length;
                    state.type_id = header.type_id;
                    state.extended = header.extended;
                    if starting {
                        state.timestamp = state.timestamp.wrapping_add(state.delta);
                    }
                }
                2 => {
                    state.delta = header.timestamp_field;
                    state.extended = header.extended;
                    if starting {
                        state.timestamp = state.timestamp.wrapping_add(state.delta);
                    }
                }
                _ => {
                    if starting {
                        state.timestamp = state.timestamp.wrapping_add(state.delta);
                    }
                }
            }

            state.partial.extend_from_slice(&payload);

            if state.partial.len() as u32 >= state.length {
                let body = state.partial.split().freeze();
                let msg = RtmpMessage::new(
                    MessageType::from_u8(state.type_id),
                    header.csid,
                    state.timestamp,
                    state.stream_id,
                    body,
                );
                return Ok(Some(msg));
            }
            // Chunk consumed but message incomplete; try the next chunk
        }
    }

    /// Inspect the chunk at the head of `buf` without consuming anything.
    fn peek_chunk(&self, buf: &BytesMut) -> Result<Option<PeekedChunk>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let b0 = buf[0];
        let format = b0 >> 6;
        let (csid, basic_len) = match b0 & 0x3F {
            0 => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                (64 + buf[1] as u32 + buf[2] as u32 * 256, 3)
            }
            id => (id as u32, 1),
        };

        let mh_len = match format {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };

        if buf.len() < basic_len + mh_len {
            return Ok(None);
        }

        let h = &buf[basic_len..basic_len + mh_len];
        let prev = self.streams.get(&csid);

        let mut timestamp_field = 0u32;
        let mut length = 0u32;
        let mut type_id = 0u8;
        let mut stream_id = 0u32;
        let mut extended = false;

        match format {
            0 => {
                timestamp_field = be24(&h[0..3]);
                length = be24(&h[3..6]);
                type_id = h[6];
                // Message stream id is the one little-endian field in RTMP
                stream_id = u32::from_le_bytes([h[7], h[8], h[9], h[10]]);
                extended = timestamp_field == EXTENDED_TIMESTAMP;
            }
            1 => {
                timestamp_field = be24(&h[0..3]);
                length = be24(&h[3..6]);
                type_id = h[6];
                extended = timestamp_field == EXTENDED_TIMESTAMP;
            }
            2 => {
                timestamp_field = be24(&h[0..3]);
                extended = timestamp_field == EXTENDED_TIMESTAMP;
            }
            _ => {
                // Format 3 repeats everything, including extended presence
                extended = prev.map(|s| s.extended).unwrap_or(false);
            }
        }

        let ext_len = if extended { 4 } else { 0 };
        if buf.len() < basic_len + mh_len + ext_len {
            return Ok(None);
        }
        if extended && format != 3 {
            let e = &buf[basic_len + mh_len..basic_len + mh_len + 4];
            timestamp_field = u32::from_be_bytes([e[0], e[1], e[2], e[3]]);
        }

        // Payload portion of this chunk
        let (msg_length, already) = match format {
            0 | 1 => (length, prev.map(|s| s.partial.len()).unwrap_or(0)),
            _ => match prev {
                Some(s) => (s.length, s.partial.len()),
                None => {
                    return Err(ProtocolError::InvalidChunk(format!(
                        "format {} chunk on unknown chunk stream {}",
                        format, csid
                    )))
                }
            },
        };

        let remaining = (msg_length as usize).saturating_sub(already);
        let payload_len = remaining.min(self.chunk_size as usize);
        let header_len = basic_len + mh_len + ext_len;

        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        Ok(Some(PeekedChunk {
            format,
            csid,
            header_len,
            payload_len,
            timestamp_field,
            length,
            type_id,
            stream_id,
            extended,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

struct PeekedChunk {
    format: u8,
    csid: u32,
    header_len: usize,
    payload_len: usize,
    timestamp_field: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    extended: bool,
}

fn be24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

/// Chunk encoder
///
/// Emits every message as a format-0 header followed by format-3
/// continuations at the negotiated outbound chunk size.
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size;
    }

    /// Serialize a message into `out`
    pub fn encode(&self, msg: &RtmpMessage, out: &mut BytesMut) {
        let csid = msg.chunk_stream_id;
        let extended = msg.timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if extended {
            EXTENDED_TIMESTAMP
        } else {
            msg.timestamp
        };

        self.put_basic_header(out, 0, csid);
        put_be24(out, ts_field);
        put_be24(out, msg.payload.len() as u32);
        out.put_u8(msg.message_type.as_u8());
        out.put_u32_le(msg.stream_id);
        if extended {
            out.put_u32(msg.timestamp);
        }

        let mut rest: Bytes = msg.payload.clone();
        let first = (self.chunk_size as usize).min(rest.len());
        out.put_slice(&rest.split_to(first));

        while !rest.is_empty() {
            self.put_basic_header(out, 3, csid);
            if extended {
                out.put_u32(msg.timestamp);
            }
            let take = (self.chunk_size as usize).min(rest.len());
            out.put_slice(&rest.split_to(take));
        }
    }

    fn put_basic_header(&self, out: &mut BytesMut, format: u8, csid: u32) {
        if csid < 64 {
            out.put_u8((format << 6) | csid as u8);
        } else if csid < 320 {
            out.put_u8(format << 6);
            out.put_u8((csid - 64) as u8);
        } else {
            out.put_u8((format << 6) | 1);
            out.put_u16_le((csid - 64) as u16);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn put_be24(out: &mut BytesMut, v: u32) {
    out.put_u8((v >> 16) as u8);
    out.put_u8((v >> 8) as u8);
    out.put_u8(v as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msgs: &[RtmpMessage], out_size: u32, in_size: u32) -> Vec<RtmpMessage> {
        let mut enc = ChunkEncoder::new();
        enc.set_chunk_size(out_size);
        let mut wire = BytesMut::new();
        for m in msgs {
            enc.encode(m, &mut wire);
        }

        let mut dec = ChunkDecoder::new();
        dec.set_chunk_size(in_size);
        let mut got = Vec::new();
        while let Some(m) = dec.try_decode(&mut wire).unwrap() {
            got.push(m);
        }
        assert!(wire.is_empty());
        got
    }

    #[test]
    fn test_single_small_message() {
        let msg = RtmpMessage::new(
            MessageType::Invoke,
            3,
            0,
            0,
            Bytes::from_static(b"hello"),
        );
        let got = roundtrip(&[msg], 128, 128);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message_type, MessageType::Invoke);
        assert_eq!(got[0].chunk_stream_id, 3);
        assert_eq!(&got[0].payload[..], b"hello");
    }

    #[test]
    fn test_multi_chunk_message() {
        let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let msg = RtmpMessage::new(
            MessageType::Video,
            6,
            1234,
            1,
            Bytes::from(body.clone()),
        );
        let got = roundtrip(&[msg], 128, 128);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, 1234);
        assert_eq!(got[0].stream_id, 1);
        assert_eq!(&got[0].payload[..], &body[..]);
    }

    #[test]
    fn test_large_chunk_size() {
        let body = vec![7u8; 5000];
        let msg = RtmpMessage::new(MessageType::Audio, 4, 99, 1, Bytes::from(body.clone()));
        let got = roundtrip(&[msg], 4096, 4096);
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0].payload[..], &body[..]);
    }

    #[test]
    fn test_extended_timestamp() {
        let msg = RtmpMessage::new(
            MessageType::Audio,
            4,
            0x0100_0000,
            1,
            Bytes::from(vec![1u8; 300]),
        );
        let got = roundtrip(&[msg], 128, 128);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].timestamp, 0x0100_0000);
        assert_eq!(got[0].payload.len(), 300);
    }

    #[test]
    fn test_partial_input_returns_none() {
        let msg = RtmpMessage::new(
            MessageType::Invoke,
            3,
            0,
            0,
            Bytes::from(vec![9u8; 200]),
        );
        let enc = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        enc.encode(&msg, &mut wire);

        let mut dec = ChunkDecoder::new();
        let mut first = wire.split_to(60);
        assert!(dec.try_decode(&mut first).unwrap().is_none());

        // Feed the rest
        first.unsplit(wire);
        let got = dec.try_decode(&mut first).unwrap().unwrap();
        assert_eq!(got.payload.len(), 200);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        // Two messages on different chunk streams, chunks interleaved by hand
        let enc = ChunkEncoder::new();
        let a = RtmpMessage::new(MessageType::Audio, 4, 10, 1, Bytes::from(vec![1u8; 200]));
        let b = RtmpMessage::new(MessageType::Video, 6, 20, 1, Bytes::from(vec![2u8; 200]));

        let mut wa = BytesMut::new();
        let mut wb = BytesMut::new();
        enc.encode(&a, &mut wa);
        enc.encode(&b, &mut wb);

        // a: [hdr+128][cont-hdr+72]; split and interleave with b's chunks
        let a1 = wa.split_to(12 + 128);
        let b1 = wb.split_to(12 + 128);

        let mut wire = BytesMut::new();
        wire.extend_from_slice(&a1);
        wire.extend_from_slice(&b1);
        wire.extend_from_slice(&wa);
        wire.extend_from_slice(&wb);

        let mut dec = ChunkDecoder::new();
        let first = dec.try_decode(&mut wire).unwrap().unwrap();
        let second = dec.try_decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.message_type, MessageType::Audio);
        assert_eq!(second.message_type, MessageType::Video);
        assert_eq!(first.payload.len(), 200);
        assert_eq!(second.payload.len(), 200);
    }

    #[test]
    fn test_format1_delta_accumulates() {
        // Hand-built: fmt0 at ts 100, then fmt1 with delta 23, then fmt3
        let mut wire = BytesMut::new();

        // fmt0, csid 4: ts=100 len=2 type=8 stream=1
        wire.put_u8(0x04);
        put_be24(&mut wire, 100);
        put_be24(&mut wire, 2);
        wire.put_u8(8);
        wire.put_u32_le(1);
        wire.put_slice(&[0xAA, 0xBB]);

        // fmt1, csid 4: delta=23 len=2 type=8
        wire.put_u8(0x44);
        put_be24(&mut wire, 23);
        put_be24(&mut wire, 2);
        wire.put_u8(8);
        wire.put_slice(&[0xCC, 0xDD]);

        // fmt3, csid 4: repeat everything (new message, delta re-applied)
        wire.put_u8(0xC4);
        wire.put_slice(&[0xEE, 0xFF]);

        let mut dec = ChunkDecoder::new();
        let m1 = dec.try_decode(&mut wire).unwrap().unwrap();
        let m2 = dec.try_decode(&mut wire).unwrap().unwrap();
        let m3 = dec.try_decode(&mut wire).unwrap().unwrap();

        assert_eq!(m1.timestamp, 100);
        assert_eq!(m2.timestamp, 123);
        assert_eq!(m3.timestamp, 146);
        assert_eq!(dec.channel_timestamp(4), Some(146));
    }

    #[test]
    fn test_format2_timestamp_only() {
        let mut wire = BytesMut::new();

        // fmt0, csid 5: ts=0 len=3 type=9 stream=1
        wire.put_u8(0x05);
        put_be24(&mut wire, 0);
        put_be24(&mut wire, 3);
        wire.put_u8(9);
        wire.put_u32_le(1);
        wire.put_slice(&[1, 2, 3]);

        // fmt2, csid 5: delta=40, same length/type
        wire.put_u8(0x85);
        put_be24(&mut wire, 40);
        wire.put_slice(&[4, 5, 6]);

        let mut dec = ChunkDecoder::new();
        let m1 = dec.try_decode(&mut wire).unwrap().unwrap();
        let m2 = dec.try_decode(&mut wire).unwrap().unwrap();
        assert_eq!(m1.timestamp, 0);
        assert_eq!(m2.timestamp, 40);
        assert_eq!(m2.message_type, MessageType::Video);
        assert_eq!(m2.stream_id, 1);
    }

    #[test]
    fn test_format3_on_unknown_stream_is_error() {
        let mut wire = BytesMut::new();
        wire.put_u8(0xC7); // fmt3, csid 7, never seen
        wire.put_u8(0x00);

        let mut dec = ChunkDecoder::new();
        assert!(dec.try_decode(&mut wire).is_err());
    }

    #[test]
    fn test_two_byte_csid() {
        let msg = RtmpMessage::new(
            MessageType::Info,
            100,
            5,
            1,
            Bytes::from_static(b"meta"),
        );
        let got = roundtrip(&[msg], 128, 128);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].chunk_stream_id, 100);
    }

    #[test]
    fn test_chunk_size_change_between_messages() {
        let enc_small = {
            let mut e = ChunkEncoder::new();
            e.set_chunk_size(64);
            e
        };
        let msg = RtmpMessage::new(MessageType::Audio, 4, 1, 1, Bytes::from(vec![3u8; 100]));
        let mut wire = BytesMut::new();
        enc_small.encode(&msg, &mut wire);

        let mut dec = ChunkDecoder::new();
        dec.set_chunk_size(64);
        let got = dec.try_decode(&mut wire).unwrap().unwrap();
        assert_eq!(got.payload.len(), 100);
    }

    #[test]
    fn test_empty_payload_message() {
        let msg = RtmpMessage::new(MessageType::Invoke, 3, 0, 0, Bytes::new());
        let got = roundtrip(&[msg], 128, 128);
        assert_eq!(got.len(), 1);
        assert!(got[0].payload.is_empty());
    }
}

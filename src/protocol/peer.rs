//! RTMP peer
//!
//! One half of a session pair: the socket, the chunk codec state for both
//! directions, and the captured link parameters. The proxy owns two of these
//! (downstream toward the client, upstream toward the origin); the stub owns
//! one.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::chunk::{ChunkDecoder, ChunkEncoder};
use super::constants::CSID_INVOKE;
use super::handshake::{Handshake, HandshakeRole};
use super::message::{MessageType, RtmpMessage};
use crate::amf::{amf0, AmfValue};
use crate::error::{Error, HandshakeError, ProtocolError, Result};
use crate::link::{Link, Protocol};

/// Chunk stream librtmp-compatible clients carry pause/seek commands on
const CSID_VIDEO: u32 = 8;

/// One RTMP session endpoint
pub struct RtmpPeer<S> {
    stream: S,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    connected: bool,

    /// Captured streaming parameters
    pub link: Link,

    /// Message stream id recorded at `play`
    pub stream_id: u32,

    /// Chunk stream the peer delivers media on
    pub media_channel: Option<u32>,

    /// Timestamp of the last media message
    pub media_stamp: u32,

    /// Media timestamp recorded when a pause was issued
    pub pause_stamp: u32,

    /// Set once the upstream reports NetStream.Play.Start
    pub playing: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RtmpPeer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            read_buf: BytesMut::with_capacity(16 * 1024),
            write_buf: BytesMut::with_capacity(16 * 1024),
            connected: true,
            link: Link::new(),
            stream_id: 0,
            media_channel: None,
            media_stamp: 0,
            pause_stamp: 0,
            playing: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Unread bytes already pulled off the socket.
    ///
    /// The splice loop services a side with buffered data before waiting on
    /// readiness again, so a message that arrived piggybacked on an earlier
    /// read is never stalled behind `select!`.
    pub fn has_buffered(&self) -> bool {
        !self.read_buf.is_empty()
    }

    pub fn in_chunk_size(&self) -> u32 {
        self.decoder.chunk_size()
    }

    pub fn set_in_chunk_size(&mut self, size: u32) {
        self.decoder.set_chunk_size(size);
    }

    pub fn out_chunk_size(&self) -> u32 {
        self.encoder.chunk_size()
    }

    pub fn set_out_chunk_size(&mut self, size: u32) {
        self.encoder.set_chunk_size(size);
    }

    /// Last absolute timestamp seen on a chunk stream
    pub fn channel_timestamp(&self, chunk_stream_id: u32) -> Option<u32> {
        self.decoder.channel_timestamp(chunk_stream_id)
    }

    /// Decode a message from already-buffered bytes without touching the
    /// socket. Returns `None` when the buffer holds no complete message.
    pub fn poll_buffered(&mut self) -> Result<Option<RtmpMessage>> {
        match self.decoder.try_decode(&mut self.read_buf)? {
            Some(msg) => {
                self.note_media(&msg);
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    fn note_media(&mut self, msg: &RtmpMessage) {
        match msg.message_type {
            MessageType::Audio | MessageType::Video | MessageType::Flv => {
                self.media_channel = Some(msg.chunk_stream_id);
                self.media_stamp = msg.timestamp;
            }
            _ => {}
        }
    }

    /// Perform the server side of the RTMP handshake
    pub async fn accept(&mut self) -> Result<()> {
        self.handshake(HandshakeRole::Server).await
    }

    /// Perform the client side of the RTMP handshake, then send the replayed
    /// `connect` command if one is given.
    ///
    /// The replay is the captured downstream connect packet moved into this
    /// peer; the origin sees the exact invocation the client composed.
    pub async fn connect(&mut self, connect_msg: Option<RtmpMessage>) -> Result<()> {
        self.handshake(HandshakeRole::Client).await?;
        if let Some(msg) = connect_msg {
            self.send_message(&msg).await?;
        }
        Ok(())
    }

    async fn handshake(&mut self, role: HandshakeRole) -> Result<()> {
        let mut hs = Handshake::new(role);

        if let Some(initial) = hs.generate_initial() {
            self.stream.write_all(&initial).await?;
            self.stream.flush().await?;
        }

        while !hs.is_done() {
            let needed = hs.bytes_needed();
            while self.read_buf.len() < needed {
                let n = self.stream.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(HandshakeError::Incomplete.into());
                }
            }

            let mut step = self.read_buf.split_to(needed).freeze();
            if let Some(response) = hs.process(&mut step)? {
                self.stream.write_all(&response).await?;
                self.stream.flush().await?;
            }
        }

        Ok(())
    }

    /// Read one fully reassembled message.
    ///
    /// Buffered bytes are drained before the socket is touched again. Media
    /// messages update the media channel and stamp bookkeeping the splice
    /// engine consults for pause handling.
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(msg) = self.poll_buffered()? {
                return Ok(msg);
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                self.connected = false;
                return Err(ProtocolError::Disconnected.into());
            }
        }
    }

    /// Serialize and send one message at the current outbound chunk size
    pub async fn send_message(&mut self, msg: &RtmpMessage) -> Result<()> {
        self.write_buf.clear();
        self.encoder.encode(msg, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Issue a pause toggle: pause at the given stamp, then unpause.
    ///
    /// Nudges a stalled origin into resending from the pause point; the
    /// splice engine discards the replayed backlog up to the media stamp.
    pub async fn send_pause_toggle(&mut self, stamp: u32) -> Result<()> {
        self.pause_stamp = stamp;
        self.send_pause(true, stamp).await?;
        self.send_pause(false, stamp).await
    }

    async fn send_pause(&mut self, pause: bool, stamp: u32) -> Result<()> {
        let body = amf0::encode_all(&[
            AmfValue::String("pause".into()),
            AmfValue::Number(0.0),
            AmfValue::Null,
            AmfValue::Boolean(pause),
            AmfValue::Number(stamp as f64),
        ]);
        let msg = RtmpMessage::new(MessageType::Invoke, CSID_VIDEO, 0, self.stream_id, body);
        self.send_message(&msg).await
    }

    /// Send an invoke on the command channel (message stream 0)
    pub async fn send_invoke(&mut self, values: &[AmfValue]) -> Result<()> {
        let body = amf0::encode_all(values);
        let msg = RtmpMessage::new(MessageType::Invoke, CSID_INVOKE, 0, 0, body);
        self.send_message(&msg).await
    }

    /// Shut down the transport
    pub async fn close(&mut self) {
        if self.connected {
            let _ = self.stream.shutdown().await;
            self.connected = false;
        }
    }
}

impl RtmpPeer<TcpStream> {
    /// Open the upstream session the captured link points at and replay the
    /// client's connect invocation.
    ///
    /// RTMPE links are attempted over plain TCP (packet-level encryption
    /// belongs to the transport library); the origin decides whether to
    /// accept.
    pub async fn connect_upstream(link: Link, connect_msg: RtmpMessage) -> Result<Self> {
        let host = link.hostname.clone().ok_or_else(|| {
            Error::Protocol(ProtocolError::UpstreamConnect(
                "no hostname captured from tcUrl".into(),
            ))
        })?;

        if link.protocol == Some(Protocol::Rtmpe) {
            tracing::warn!(host = %host, "rtmpe requested, connecting in the clear");
        }

        let addr = (host.as_str(), link.port);
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            Error::Protocol(ProtocolError::UpstreamConnect(format!(
                "{}:{}: {}",
                host, link.port, e
            )))
        })?;
        stream.set_nodelay(true).ok();

        let mut peer = RtmpPeer::new(stream);
        peer.link = link;
        peer.connect(Some(connect_msg)).await?;
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (a, b) = duplex(64 * 1024);
        let mut server = RtmpPeer::new(a);
        let mut client = RtmpPeer::new(b);

        let (s, c) = tokio::join!(server.accept(), client.connect(None));
        s.unwrap();
        c.unwrap();
    }

    #[tokio::test]
    async fn test_message_exchange() {
        let (a, b) = duplex(64 * 1024);
        let mut server = RtmpPeer::new(a);
        let mut client = RtmpPeer::new(b);

        let (s, c) = tokio::join!(server.accept(), client.connect(None));
        s.unwrap();
        c.unwrap();

        let body = Bytes::from(vec![0x42u8; 500]);
        let msg = RtmpMessage::new(MessageType::Invoke, 3, 0, 0, body.clone());
        client.send_message(&msg).await.unwrap();

        let got = server.read_message().await.unwrap();
        assert_eq!(got.message_type, MessageType::Invoke);
        assert_eq!(got.payload, body);
    }

    #[tokio::test]
    async fn test_media_bookkeeping() {
        let (a, b) = duplex(64 * 1024);
        let mut server = RtmpPeer::new(a);
        let mut client = RtmpPeer::new(b);

        let (s, c) = tokio::join!(server.accept(), client.connect(None));
        s.unwrap();
        c.unwrap();

        let audio = RtmpMessage::new(
            MessageType::Audio,
            4,
            46,
            1,
            Bytes::from_static(&[0xAF, 0x01, 0x00]),
        );
        client.send_message(&audio).await.unwrap();

        let got = server.read_message().await.unwrap();
        assert_eq!(got.timestamp, 46);
        assert_eq!(server.media_channel, Some(4));
        assert_eq!(server.media_stamp, 46);
    }

    #[tokio::test]
    async fn test_disconnect_reported() {
        let (a, b) = duplex(64 * 1024);
        let mut server = RtmpPeer::new(a);
        let mut client = RtmpPeer::new(b);

        let (s, c) = tokio::join!(server.accept(), client.connect(None));
        s.unwrap();
        c.unwrap();

        drop(client);
        let err = server.read_message().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Disconnected)
        ));
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_send_invoke_decodes() {
        let (a, b) = duplex(64 * 1024);
        let mut server = RtmpPeer::new(a);
        let mut client = RtmpPeer::new(b);

        let (s, c) = tokio::join!(server.accept(), client.connect(None));
        s.unwrap();
        c.unwrap();

        server
            .send_invoke(&[
                AmfValue::String("_result".into()),
                AmfValue::Number(1.0),
                AmfValue::Null,
                AmfValue::Number(1.0),
            ])
            .await
            .unwrap();

        let got = client.read_message().await.unwrap();
        assert_eq!(got.message_type, MessageType::Invoke);
        let values = amf0::decode_all(&got.payload).unwrap();
        assert_eq!(values[0], AmfValue::String("_result".into()));
    }
}

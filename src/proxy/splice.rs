//! Bidirectional splice
//!
//! The long-lived loop of a proxy connection: downstream handshake, the
//! connect pump, then the two-way relay with chunk-size mirroring,
//! buffer-time rewriting, SWF-verify handling, pause on upstream stall, and
//! ordered teardown.

use std::io::Write;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, timeout};

use super::dispatch::{Side, Verdict};
use super::{ProxySession, SessionState};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::{control_event, BUFFERTIME};
use crate::protocol::message::{MessageType, RtmpMessage};

/// Readiness wait for the downstream handshake
const HANDSHAKE_WAIT: Duration = Duration::from_secs(5);

/// Splice wait while an output file is active
const PLAYING_WAIT: Duration = Duration::from_secs(30);

/// Splice wait while idle (gives slow sessions time to start up)
const IDLE_WAIT: Duration = Duration::from_secs(60);

enum Event {
    FromClient(RtmpMessage),
    FromServer(RtmpMessage),
    ClientGone,
    ServerGone,
    TimedOut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProxySession<S> {
    /// Serve this connection to completion, then tear everything down.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;

        tracing::info!(session_id = self.session_id(), "closing connection");
        self.downstream.close().await;
        if let Some(up) = self.upstream.as_mut() {
            up.close().await;
        }
        self.outputs.close_all();
        self.state = SessionState::Stopped;

        result
    }

    async fn serve(&mut self) -> Result<()> {
        // Phase 1: downstream handshake under the readiness guard
        match timeout(HANDSHAKE_WAIT, self.downstream.accept()).await {
            Ok(done) => done?,
            Err(_) => {
                tracing::error!("request timeout, ignoring request");
                return Err(ProtocolError::Timeout.into());
            }
        }
        self.state = SessionState::InProgress;

        self.connect_pump().await?;
        self.splice().await
    }

    /// Phase 2: only `connect` can progress the session. Nothing is
    /// forwarded here; the upstream connect replays the captured packet.
    async fn connect_pump(&mut self) -> Result<()> {
        while self.upstream.is_none() {
            let mut msg = match timeout(IDLE_WAIT, self.downstream.read_message()).await {
                Ok(read) => read?,
                Err(_) => return Err(ProtocolError::Timeout.into()),
            };

            match msg.message_type {
                MessageType::SetChunkSize => self.adopt_client_chunk_size(&msg),
                t if t.is_invoke_like() => {
                    if self.dispatch(Side::Client, &mut msg).await == Verdict::Fatal {
                        return Err(ProtocolError::UpstreamConnect(
                            "connect rejected".to_string(),
                        )
                        .into());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Phase 3: the bidirectional relay
    async fn splice(&mut self) -> Result<()> {
        let mut paused = false;

        loop {
            let down_alive = self.downstream.is_connected();
            let up_alive = self.upstream.as_ref().is_some_and(|u| u.is_connected());
            if !down_alive && !up_alive {
                break;
            }

            match self.next_event(down_alive, up_alive).await? {
                Event::FromClient(msg) => self.service_client(msg).await?,
                Event::FromServer(msg) => self.service_server(msg, &mut paused).await?,
                Event::ClientGone | Event::ServerGone => {}
                Event::TimedOut => {
                    if self.try_pause_upstream(&mut paused).await? {
                        continue;
                    }
                    tracing::error!("request timeout, ignoring request");
                    return Err(ProtocolError::Timeout.into());
                }
            }

            // A closed client with nothing left to record ends upstream too
            if !self.downstream.is_connected() && !self.outputs.is_active() {
                if let Some(up) = self.upstream.as_mut() {
                    if up.is_connected() {
                        up.close().await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Wait for the next unit of work: buffered data first, then socket
    /// readiness on both sides with the playing/idle timeout.
    async fn next_event(&mut self, down_alive: bool, up_alive: bool) -> Result<Event> {
        if down_alive {
            if let Some(msg) = self.downstream.poll_buffered()? {
                return Ok(Event::FromClient(msg));
            }
        }
        if up_alive {
            if let Some(up) = self.upstream.as_mut() {
                if let Some(msg) = up.poll_buffered()? {
                    return Ok(Event::FromServer(msg));
                }
            }
        }

        let wait = if self.outputs.is_active() {
            PLAYING_WAIT
        } else {
            IDLE_WAIT
        };

        let downstream = &mut self.downstream;
        let upstream = self.upstream.as_mut();

        tokio::select! {
            read = downstream.read_message(), if down_alive => match read {
                Ok(msg) => Ok(Event::FromClient(msg)),
                Err(Error::Protocol(ProtocolError::Disconnected)) => Ok(Event::ClientGone),
                Err(e) => Err(e),
            },
            read = async {
                match upstream {
                    Some(up) => up.read_message().await,
                    None => std::future::pending().await,
                }
            }, if up_alive => match read {
                Ok(msg) => Ok(Event::FromServer(msg)),
                Err(Error::Protocol(ProtocolError::Disconnected)) => Ok(Event::ServerGone),
                Err(e) => Err(e),
            },
            _ = sleep(wait) => Ok(Event::TimedOut),
        }
    }

    /// Handle one client packet and forward it upstream
    async fn service_client(&mut self, mut msg: RtmpMessage) -> Result<()> {
        match msg.message_type {
            MessageType::SetChunkSize => self.adopt_client_chunk_size(&msg),
            MessageType::BytesRead => {
                if msg.payload.len() >= 4 {
                    let count = u32::from_be_bytes([
                        msg.payload[0],
                        msg.payload[1],
                        msg.payload[2],
                        msg.payload[3],
                    ]);
                    tracing::debug!(count, "client: bytes received");
                }
            }
            MessageType::Control => clamp_buffer_length(&mut msg),
            t if t.is_invoke_like() => {
                match self.dispatch(Side::Client, &mut msg).await {
                    Verdict::StopStream => self.outputs.close_current(),
                    Verdict::Fatal => {
                        return Err(ProtocolError::UpstreamConnect(
                            "connect rejected".to_string(),
                        )
                        .into())
                    }
                    Verdict::Continue => {}
                }
            }
            _ => {}
        }

        if let Some(up) = self.upstream.as_mut() {
            if up.is_connected() {
                up.send_message(&msg).await?;
            }
        }
        Ok(())
    }

    /// Handle one upstream packet: pause backlog, chunk-size mirroring, SWF
    /// verify, media persistence, dispatch, then forward to the client.
    async fn service_server(&mut self, mut msg: RtmpMessage, paused: &mut bool) -> Result<()> {
        if *paused {
            // Discard the replayed backlog up to the pause mark
            let mark = self.upstream.as_ref().map(|u| u.pause_stamp).unwrap_or(0);
            if msg.timestamp <= mark {
                return Ok(());
            }
            *paused = false;
        }

        match msg.message_type {
            MessageType::SetChunkSize => {
                if msg.payload.len() >= 4 {
                    let size = u32::from_be_bytes([
                        msg.payload[0],
                        msg.payload[1],
                        msg.payload[2],
                        msg.payload[3],
                    ]);
                    tracing::debug!(size, "server: chunk size change");
                    if let Some(up) = self.upstream.as_mut() {
                        up.set_in_chunk_size(size);
                    }
                    self.downstream.set_out_chunk_size(size);
                }
            }
            MessageType::Control => {
                if msg.payload.len() >= 2 {
                    let event =
                        u16::from_be_bytes([msg.payload[0], msg.payload[1]]);
                    if event == control_event::SWF_VERIFY_REQUEST {
                        if let Some(digest) = self.link.swf_hash {
                            if let Some(up) = self.upstream.as_mut() {
                                up.send_message(&RtmpMessage::swf_verify_response(&digest))
                                    .await?;
                            }
                            // Answered locally; the client never sees it
                            return Ok(());
                        }
                        tracing::error!(
                            "server requested SWF verification, no swf hash available"
                        );
                    }
                }
            }
            t if t.is_media() => {
                if self.outputs.is_active() {
                    let rendered = self.writer.render(&msg).map_err(Error::Protocol)?;
                    if !rendered.is_empty() {
                        if let Some(out) = self.outputs.current() {
                            if let Some(file) = out.file.as_mut() {
                                file.write_all(rendered)?;
                            }
                        }
                    }
                }
            }
            t if t.is_invoke_like() => {
                if self.dispatch(Side::Server, &mut msg).await == Verdict::StopStream {
                    self.outputs.close_current();
                }
            }
            _ => {}
        }

        if self.downstream.is_connected() {
            self.downstream.send_message(&msg).await?;
        }
        Ok(())
    }

    /// On a stall while playing: record the pause stamp and toggle the
    /// upstream stream once. Returns whether the timeout was absorbed.
    async fn try_pause_upstream(&mut self, paused: &mut bool) -> Result<bool> {
        if !self.outputs.is_active() || *paused {
            return Ok(false);
        }
        let Some(up) = self.upstream.as_mut() else {
            return Ok(false);
        };
        let Some(channel) = up.media_channel else {
            return Ok(false);
        };

        let stamp = up.channel_timestamp(channel).unwrap_or(up.media_stamp);
        tracing::debug!(stamp, "upstream stalled, toggling pause");
        up.send_pause_toggle(stamp).await?;
        *paused = true;
        Ok(true)
    }

    /// SET_CHUNK_SIZE from the client: adopt it inbound and mirror it onto
    /// the upstream's outbound framing so both sides stay coherent.
    fn adopt_client_chunk_size(&mut self, msg: &RtmpMessage) {
        if msg.payload.len() >= 4 {
            let size = u32::from_be_bytes([
                msg.payload[0],
                msg.payload[1],
                msg.payload[2],
                msg.payload[3],
            ]);
            tracing::debug!(size, "client: chunk size change");
            self.downstream.set_in_chunk_size(size);
            if let Some(up) = self.upstream.as_mut() {
                up.set_out_chunk_size(size);
            }
        }
    }
}

/// CONTROL sub-type 3 (set buffer length) on a non-zero stream: clamp the
/// requested buffer time up to four hours before forwarding.
fn clamp_buffer_length(msg: &mut RtmpMessage) {
    let p = &msg.payload;
    if p.len() < 10 {
        return;
    }
    let event = u16::from_be_bytes([p[0], p[1]]);
    if event != control_event::SET_BUFFER_LENGTH {
        return;
    }
    let stream_id = u32::from_be_bytes([p[2], p[3], p[4], p[5]]);
    // The interesting media rides a non-zero stream
    if stream_id == 0 {
        return;
    }
    let len = u32::from_be_bytes([p[6], p[7], p[8], p[9]]);
    tracing::debug!(stream_id, len, "client: buffer time change");
    if len < BUFFERTIME {
        let mut body = BytesMut::from(&p[..]);
        body[6..10].copy_from_slice(&BUFFERTIME.to_be_bytes());
        msg.payload = body.freeze();
    }
}

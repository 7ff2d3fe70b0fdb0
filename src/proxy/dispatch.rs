//! Invocation dispatcher
//!
//! Decodes AMF command messages from either direction, mutates the session
//! link state, and decides what the splice loop does next with the packet.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use super::ProxySession;
use crate::amf::{amf0, AmfProperty, AmfValue};
use crate::command;
use crate::naming;
use crate::protocol::message::{MessageType, RtmpMessage};
use crate::protocol::RtmpPeer;

/// Which peer produced the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn label(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// What the splice loop does after a command was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep going; forward the (possibly rewritten) packet
    Continue,
    /// Close the current output file and keep the session alive
    StopStream,
    /// Terminate the session
    Fatal,
}

/// Status codes from upstream that end the current stream
const FAILURE_CODES: [&str; 4] = [
    "NetStream.Failed",
    "NetStream.Play.Failed",
    "NetStream.Play.StreamNotFound",
    "NetConnection.Connect.InvalidApp",
];

impl<S: AsyncRead + AsyncWrite + Unpin> ProxySession<S> {
    /// Dispatch one invoke/flex command message.
    ///
    /// The flex variant carries a one-byte version prefix before the AMF
    /// body. The message is mutable because `play2` is rewritten in place.
    pub async fn dispatch(&mut self, side: Side, msg: &mut RtmpMessage) -> Verdict {
        let offset = if msg.message_type == MessageType::FlexMessage {
            1
        } else {
            0
        };
        if msg.payload.len() <= offset {
            return Verdict::Continue;
        }

        let body = &msg.payload[offset..];
        if body[0] != 0x02 {
            // Command payloads always open with a string method name
            tracing::warn!(side = side.label(), "sanity failed: no string method in invoke packet");
            return Verdict::Continue;
        }

        let values = match amf0::decode_all(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(side = side.label(), error = %e, "error decoding invoke packet");
                return Verdict::Continue;
            }
        };

        let Some(method) = values.first().and_then(|v| v.as_str()).map(str::to_string) else {
            return Verdict::Continue;
        };
        tracing::debug!(side = side.label(), method = %method, "invoking");

        match method.as_str() {
            "connect" => self.on_connect(&values, msg).await,
            "NetStream.Authenticate.UsherToken" => {
                let token = values.get(3).and_then(|v| v.as_str()).unwrap_or("");
                let escaped = command::escape_usher_token(token);
                tracing::info!(usher_token = %escaped, "captured usher token");
                self.link.usher_token = Some(escaped);
                Verdict::Continue
            }
            "play2" => {
                Self::suppress_play2(msg);
                Verdict::Continue
            }
            "play" => self.on_play(&values, msg),
            "onStatus" => self.on_status(&values),
            "closeStream" => Verdict::StopStream,
            "close" => {
                if let Some(up) = self.upstream.as_mut() {
                    up.close().await;
                }
                Verdict::StopStream
            }
            _ => Verdict::Continue,
        }
    }

    /// Capture the connect parameters and open the matching upstream
    /// session, replaying the client's packet as its first command.
    async fn on_connect(&mut self, values: &[AmfValue], msg: &RtmpMessage) -> Verdict {
        if self.upstream.is_some() {
            tracing::warn!("duplicate connect, ignoring");
            return Verdict::Continue;
        }

        tracing::info!("processing connect");
        if let Some(cobj) = values.get(2).and_then(|v| v.as_object()) {
            for (name, value) in cobj {
                if let Some(s) = value.as_str() {
                    tracing::info!("{:>10} : {}", name, s);
                }
                match (name.as_str(), value) {
                    ("app", AmfValue::String(s)) => self.link.app = Some(s.clone()),
                    ("flashVer", AmfValue::String(s)) => self.link.flash_ver = Some(s.clone()),
                    ("swfUrl", AmfValue::String(s)) => self.link.swf_url = Some(s.clone()),
                    ("pageUrl", AmfValue::String(s)) => self.link.page_url = Some(s.clone()),
                    ("tcUrl", AmfValue::String(s)) => self.link.apply_tc_url(s),
                    ("audioCodecs", AmfValue::Number(n)) => self.link.audio_codecs = Some(*n),
                    ("videoCodecs", AmfValue::Number(n)) => self.link.video_codecs = Some(*n),
                    ("objectEncoding", AmfValue::Number(n)) => {
                        self.link.object_encoding = Some(*n)
                    }
                    _ => {}
                }
            }
        }

        // Arguments past the command object are captured and replayed onto
        // the downloader command line
        if values.len() > 3 {
            self.link.extras = values[3..]
                .iter()
                .cloned()
                .map(AmfProperty::anonymous)
                .collect();
            self.link.extras_flags = command::extras_string(&self.link.extras);
        }

        // The library re-emits this packet upstream; the splice loop must
        // not forward it again
        match RtmpPeer::connect_upstream(self.link.clone(), msg.clone()).await {
            Ok(up) => {
                self.upstream = Some(up);
                Verdict::Continue
            }
            Err(e) => {
                tracing::error!(error = %e, "upstream connect failed");
                Verdict::Fatal
            }
        }
    }

    /// Record a play: capture the playpath, create the output file, append
    /// the downloader command line.
    fn on_play(&mut self, values: &[AmfValue], msg: &RtmpMessage) -> Verdict {
        if let Some(up) = self.upstream.as_mut() {
            up.stream_id = msg.stream_id;
        }

        let Some(playpath) = values.get(3).and_then(|v| v.as_str()).map(str::to_string) else {
            return Verdict::Continue;
        };
        self.link.playpath = Some(playpath.clone());

        let mut start_flag = 0.0;
        if let Some(v) = values.get(4) {
            if let Some(n) = v.as_number() {
                start_flag = n;
            }
        }
        let live = start_flag == -1000.0 || self.link.is_live_app();
        tracing::info!("{:>10} : {}", "live", if live { "yes" } else { "no" });

        let leaf = self.names.leaf_for(&playpath);
        let name = naming::timestamped(&leaf);
        tracing::info!("{:>10} : {}", "playpath", playpath);
        tracing::info!("{:>10} : {}", "saving as", name);

        let cmd = command::downloader_command(&self.link, live, &name, "--jtv");
        self.record_command(&cmd.line);

        match self.open_output(&playpath, name) {
            Ok(()) => Verdict::Continue,
            Err(e) => {
                tracing::error!(error = %e, "failed to open output file");
                Verdict::StopStream
            }
        }
    }

    /// React to upstream status: failure codes and play stop end the current
    /// stream; play start advances the output cursor.
    fn on_status(&mut self, values: &[AmfValue]) -> Verdict {
        let Some(info) = values.get(3) else {
            return Verdict::Continue;
        };
        let code = info.get_string("code").unwrap_or("");
        let _level = info.get_string("level").unwrap_or("");
        tracing::debug!(code = %code, "onStatus");

        if FAILURE_CODES.contains(&code) {
            return Verdict::StopStream;
        }

        if code == "NetStream.Play.Start" {
            self.outputs.advance();
            if let Some(up) = self.upstream.as_mut() {
                up.playing = true;
            }
        }

        if code == "NetStream.Play.Complete" || code == "NetStream.Play.Stop" {
            return Verdict::StopStream;
        }

        Verdict::Continue
    }

    /// Overwrite the 5th byte of the embedded `play2` so the origin never
    /// sees a valid bitrate-transition command.
    fn suppress_play2(msg: &mut RtmpMessage) {
        tracing::debug!("detected play2 request");
        let mut body = msg.payload.to_vec();
        if let Some(pos) = body.windows(5).position(|w| w == b"play2") {
            body[pos + 4] = b'z';
            msg.payload = Bytes::from(body);
        }
    }
}

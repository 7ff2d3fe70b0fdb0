//! Stub invocation server
//!
//! Terminates the session locally instead of proxying: answers the
//! invocation handshake with synthesized results, composes a downloader
//! command line from the captured parameters, spawns the downloader, and
//! sends the client a `Play.Start` / `Play.Stop` sequence.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::amf::{amf0, AmfProperty, AmfValue};
use crate::command;
use crate::error::{Error, ProtocolError, Result};
use crate::naming;
use crate::protocol::message::{MessageType, RtmpMessage};
use crate::protocol::RtmpPeer;

/// Readiness wait for the client handshake
const HANDSHAKE_WAIT: Duration = Duration::from_secs(5);

/// Interval within which an identical play is treated as a duplicate
const DUPTIME: Duration = Duration::from_millis(5000);

/// Spawn dedup state, shared across connections
#[derive(Debug, Default)]
struct DedupState {
    /// Time of the last download we started
    last_time: Option<Instant>,
    /// Output name of the last download
    last_name: String,
}

/// Stub server configuration
#[derive(Clone)]
pub struct StubConfig {
    /// File the downloader command lines are appended to
    pub command_file: PathBuf,

    /// Spawn the downloader subprocess (disabled in tests)
    pub spawn_enabled: bool,

    dedup: Arc<Mutex<DedupState>>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            command_file: PathBuf::from("Command.txt"),
            spawn_enabled: true,
            dedup: Arc::new(Mutex::new(DedupState::default())),
        }
    }
}

/// One stub session with a real client
pub struct StubSession<S> {
    peer: RtmpPeer<S>,
    /// Monotonic stream id handed out by createStream
    stream_id: u32,
    config: StubConfig,
    session_id: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StubSession<S> {
    pub fn new(session_id: u64, stream: S, config: StubConfig) -> Self {
        Self {
            peer: RtmpPeer::new(stream),
            stream_id: 0,
            config,
            session_id,
        }
    }

    /// Serve the connection until the client goes away or a play completes.
    pub async fn run(mut self) -> Result<()> {
        match timeout(HANDSHAKE_WAIT, self.peer.accept()).await {
            Ok(done) => done?,
            Err(_) => {
                tracing::error!("request timeout, ignoring request");
                return Err(ProtocolError::Timeout.into());
            }
        }

        let result = self.serve().await;
        tracing::info!(session_id = self.session_id, "closing connection");
        self.peer.close().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let msg = match self.peer.read_message().await {
                Ok(msg) => msg,
                Err(Error::Protocol(ProtocolError::Disconnected)) => return Ok(()),
                Err(e) => return Err(e),
            };

            if msg.message_type.is_invoke_like() && self.serve_invoke(&msg).await? {
                // A completed play ends the session
                return Ok(());
            }
        }
    }

    /// Dispatch one command. Returns `true` when the session should close.
    async fn serve_invoke(&mut self, msg: &RtmpMessage) -> Result<bool> {
        let offset = if msg.message_type == MessageType::FlexMessage {
            1
        } else {
            0
        };
        if msg.payload.len() <= offset {
            return Ok(false);
        }

        let body = &msg.payload[offset..];
        if body[0] != 0x02 {
            tracing::warn!("sanity failed: no string method in invoke packet");
            return Ok(false);
        }

        let values = match amf0::decode_all(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "error decoding invoke packet");
                return Ok(false);
            }
        };

        let Some(method) = values.first().and_then(|v| v.as_str()).map(str::to_string) else {
            return Ok(false);
        };
        let txn = values.get(1).and_then(|v| v.as_number()).unwrap_or(0.0);
        tracing::debug!(method = %method, "client invoking");

        match method.as_str() {
            "connect" => {
                self.capture_connect(&values);
                let encoding = self.peer.link.object_encoding.unwrap_or(0.0);
                self.peer
                    .send_invoke(&command::connect_result(txn, encoding))
                    .await?;
                self.peer.send_invoke(&command::onbwdone(true)).await?;
            }
            "createStream" => {
                self.stream_id += 1;
                self.peer
                    .send_invoke(&command::result_number(txn, self.stream_id as f64))
                    .await?;
            }
            "getStreamLength" => {
                self.peer
                    .send_invoke(&command::result_number(txn, 10.0))
                    .await?;
            }
            "NetStream.Authenticate.UsherToken" => {
                let token = values.get(3).and_then(|v| v.as_str()).unwrap_or("");
                self.peer.link.usher_token = Some(command::escape_usher_token(token));
            }
            "_checkbw" => {
                self.peer.send_invoke(&command::onbwdone_legacy()).await?;
            }
            "checkBandwidth" => {
                self.peer.send_invoke(&command::onbwdone(false)).await?;
            }
            "FCSubscribe" => {
                self.peer.send_invoke(&command::on_fc_subscribe()).await?;
            }
            "play" => {
                self.on_play(&values).await?;
                return Ok(true);
            }
            _ => {}
        }

        Ok(false)
    }

    fn capture_connect(&mut self, values: &[AmfValue]) {
        if let Some(cobj) = values.get(2).and_then(|v| v.as_object()) {
            for (name, value) in cobj {
                match (name.as_str(), value) {
                    ("app", AmfValue::String(s)) => self.peer.link.app = Some(s.clone()),
                    ("flashVer", AmfValue::String(s)) => {
                        self.peer.link.flash_ver = Some(s.clone())
                    }
                    ("swfUrl", AmfValue::String(s)) => self.peer.link.swf_url = Some(s.clone()),
                    ("pageUrl", AmfValue::String(s)) => self.peer.link.page_url = Some(s.clone()),
                    ("tcUrl", AmfValue::String(s)) => self.peer.link.apply_tc_url(s),
                    ("audioCodecs", AmfValue::Number(n)) => {
                        self.peer.link.audio_codecs = Some(*n)
                    }
                    ("videoCodecs", AmfValue::Number(n)) => {
                        self.peer.link.video_codecs = Some(*n)
                    }
                    ("objectEncoding", AmfValue::Number(n)) => {
                        self.peer.link.object_encoding = Some(*n)
                    }
                    _ => {}
                }
            }
        }

        if values.len() > 3 {
            self.peer.link.extras = values[3..]
                .iter()
                .cloned()
                .map(AmfProperty::anonymous)
                .collect();
            self.peer.link.extras_flags = command::extras_string(&self.peer.link.extras);
        }
    }

    /// Compose the downloader invocation, spawn it unless it duplicates a
    /// spawn from the last five seconds, and play the start/stop script
    /// back to the client.
    async fn on_play(&mut self, values: &[AmfValue]) -> Result<()> {
        let playpath = values
            .get(3)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        self.peer.link.playpath = Some(playpath.clone());

        let mut start_flag = 0.0;
        if let Some(v) = values.get(4) {
            if let Some(n) = v.as_number() {
                start_flag = n;
            }
        }
        let live = start_flag == -1000.0 || self.peer.link.is_live_app();

        if self.peer.link.tc_url.is_some() {
            let source = if playpath.is_empty() {
                "file"
            } else {
                playpath.as_str()
            };
            let leaf = naming::sanitize_leaf(naming::strip_playpath(source), 0);
            let name = naming::timestamped(&leaf);

            let cmd = command::downloader_command(&self.peer.link, live, &name, "-j");

            if self.is_duplicate(&name) {
                tracing::info!("duplicate request, skipping");
            } else {
                tracing::info!("\n{}\n", cmd.line);
                self.remember_spawn(&name);
                self.record_command(&cmd.line);
                if self.config.spawn_enabled {
                    spawn_downloader(&cmd.argv);
                }
            }
        }

        // Bracketed start/stop script back to the client
        self.peer
            .send_message(&RtmpMessage::stream_begin(1))
            .await?;
        let path = self.peer.link.playpath.clone().unwrap_or_default();
        self.peer
            .send_invoke(&command::play_status(
                "NetStream.Play.Start",
                "Started playing",
                &path,
            ))
            .await?;
        self.peer.send_message(&RtmpMessage::stream_eof(1)).await?;
        self.peer
            .send_invoke(&command::play_status(
                "NetStream.Play.Stop",
                "Stopped playing",
                &path,
            ))
            .await?;

        Ok(())
    }

    fn is_duplicate(&self, name: &str) -> bool {
        let dedup = match self.config.dedup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match dedup.last_time {
            Some(t) => t.elapsed() < DUPTIME && dedup.last_name == name,
            None => false,
        }
    }

    fn remember_spawn(&self, name: &str) {
        let mut dedup = match self.config.dedup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        dedup.last_time = Some(Instant::now());
        dedup.last_name = name.to_string();
    }

    fn record_command(&self, line: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.command_file)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to record downloader command");
        }
    }
}

/// Spawn the downloader as a detached subprocess.
///
/// Exited children are reaped by the runtime; a spawn failure only loses
/// this one download.
fn spawn_downloader(argv: &[String]) {
    if argv.is_empty() {
        return;
    }
    match tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .spawn()
    {
        Ok(_child) => {
            tracing::debug!(program = %argv[0], "spawned downloader");
        }
        Err(e) => {
            tracing::error!(program = %argv[0], error = %e, "failed to spawn downloader");
        }
    }
}

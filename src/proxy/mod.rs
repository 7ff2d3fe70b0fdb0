//! Intercepting proxy
//!
//! Owns the session pair for one accepted client: the downstream peer, the
//! upstream peer opened on `connect`, the output files created per `play`,
//! and the FLV writer that persists upstream media. The dispatcher
//! ([`dispatch`]) mutates this state per command; the splice loop
//! ([`ProxySession::run`]) pumps both sockets.

mod dispatch;
mod splice;

pub use dispatch::{Side, Verdict};

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::link::Link;
use crate::media::{FlvWriter, FLV_HEADER};
use crate::naming::NameHistory;
use crate::protocol::RtmpPeer;

/// Session lifecycle, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepting,
    InProgress,
    Stopping,
    Stopped,
}

/// One output file created by a `play` invocation
#[derive(Debug)]
pub struct OutputFile {
    /// Open handle; `None` once the stream stopped
    pub file: Option<File>,
    /// The playpath exactly as the client sent it
    pub playpath: String,
    /// Timestamped on-disk name
    pub name: String,
}

/// Output files in `play` order, with the cursor the upstream's
/// `NetStream.Play.Start` advances.
#[derive(Debug, Default)]
pub struct OutputList {
    files: Vec<OutputFile>,
    cur: Option<usize>,
}

impl OutputList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: OutputFile) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether a current output is active (the session is "playing")
    pub fn is_active(&self) -> bool {
        self.cur.is_some()
    }

    /// The current output file, if the cursor is set
    pub fn current(&mut self) -> Option<&mut OutputFile> {
        self.cur.map(|i| &mut self.files[i])
    }

    pub fn current_name(&self) -> Option<&str> {
        self.cur.map(|i| self.files[i].name.as_str())
    }

    /// Advance on an upstream `NetStream.Play.Start`: move to the next node
    /// when one exists, otherwise latch onto the first file that still has
    /// an open handle.
    pub fn advance(&mut self) {
        match self.cur {
            Some(i) => {
                if i + 1 < self.files.len() {
                    self.cur = Some(i + 1);
                }
            }
            None => {
                self.cur = self.files.iter().position(|f| f.file.is_some());
            }
        }
    }

    /// Close the current file and clear the cursor (stop-this-stream)
    pub fn close_current(&mut self) {
        if let Some(i) = self.cur.take() {
            self.files[i].file = None;
        }
    }

    /// Close every file (teardown)
    pub fn close_all(&mut self) {
        for f in &mut self.files {
            f.file = None;
        }
        self.cur = None;
    }
}

/// Where the proxy writes its artifacts
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Directory output files land in
    pub output_dir: PathBuf,
    /// File the downloader command lines are appended to
    pub command_file: PathBuf,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            command_file: PathBuf::from("Command.txt"),
        }
    }
}

/// The per-connection object pair: downstream session, upstream session,
/// output files, and the scratch shared across them.
pub struct ProxySession<S> {
    pub downstream: RtmpPeer<S>,
    pub upstream: Option<RtmpPeer<TcpStream>>,

    /// Parameters captured from the client, used to open and drive upstream
    pub link: Link,

    pub outputs: OutputList,
    pub names: NameHistory,
    pub writer: FlvWriter,
    pub state: SessionState,

    pub config: ProxyConfig,
    session_id: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProxySession<S> {
    pub fn new(session_id: u64, stream: S, config: ProxyConfig) -> Self {
        Self {
            downstream: RtmpPeer::new(stream),
            upstream: None,
            link: Link::new(),
            outputs: OutputList::new(),
            names: NameHistory::new(),
            writer: FlvWriter::new(),
            state: SessionState::Accepting,
            config,
            session_id,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Create the output file for a play: open, write the FLV header,
    /// append the node.
    pub(crate) fn open_output(&mut self, playpath: &str, name: String) -> Result<()> {
        let path = self.config.output_dir.join(&name);
        let mut file = File::create(&path)?;
        file.write_all(&FLV_HEADER)?;

        self.outputs.push(OutputFile {
            file: Some(file),
            playpath: playpath.to_string(),
            name,
        });
        Ok(())
    }

    /// Append one downloader command line to the command file.
    ///
    /// Failure to record the line never kills the session.
    pub(crate) fn record_command(&self, line: &str) {
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

//! rtmp-tap
//!
//! An intercepting RTMP proxy and companion stub server. The proxy sits
//! between a Flash-style client and its media origin, relays both directions
//! of the session while capturing the streaming parameters, records every
//! played stream to an FLV file, and appends a reproducible downloader
//! command line per play. The stub answers the invocation handshake locally
//! and hands the captured parameters to an external downloader instead of
//! proxying.
//!
//! # Architecture
//!
//! ```text
//!            +------------------------------------------+
//!   client ──┤ downstream peer   ProxySession  upstream ├── origin
//!            │        │               │           │     │
//!            │        └── dispatcher ─┴─ FLV writer ──> *.flv
//!            +------------------------------------------+
//! ```
//!
//! The building blocks are exposed as a library: the protocol substrate
//! ([`protocol`]), the AMF0 codec ([`amf`]), the capture state ([`link`]),
//! naming rules ([`naming`]), command builders ([`command`]), the FLV writer
//! ([`media`]), the sessions ([`proxy`], [`stub`]) and the listening shell
//! ([`server`]).

pub mod amf;
pub mod command;
pub mod error;
pub mod link;
pub mod media;
pub mod naming;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod stub;

pub use error::{Error, Result};
pub use link::Link;
pub use proxy::{ProxyConfig, ProxySession};
pub use server::{Server, ServerConfig};
pub use stub::{StubConfig, StubSession};

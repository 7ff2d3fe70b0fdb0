//! Listening server shell
//!
//! Accept loop, per-connection spawn, TLS accept, shutdown plumbing and the
//! stdin console UI shared by the proxy and stub binaries.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::{spawn_console_ui, ClientStream, Server, ShutdownHandle};

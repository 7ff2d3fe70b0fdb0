//! Intercepting RTMP proxy
//!
//! Run with: `rtmp-tap [--port 1935] [-z]`
//!
//! Accepts RTMP clients on `0.0.0.0`, relays each session to the origin the
//! client's `tcUrl` points at, records every played stream to an FLV file in
//! the working directory, and appends a downloader command line per play to
//! `Command.txt`. Type `q` on stdin (or send SIGINT) to stop.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use rtmp_tap::proxy::{ProxyConfig, ProxySession};
use rtmp_tap::server::{spawn_console_ui, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "rtmp-tap", version, about = "Intercepting RTMP proxy that records played streams")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 1935)]
    port: u16,

    /// Verbose logging
    #[arg(short = 'z')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    tracing::info!("RTMP proxy server {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::default().port(args.port);
    let proxy_config = ProxyConfig::default();

    let server = Arc::new(Server::new(config, move |session_id, stream, peer_addr| {
        let config = proxy_config.clone();
        async move {
            tracing::debug!(session_id, peer = %peer_addr, "accepted connection");
            if let Err(e) = ProxySession::new(session_id, stream, config).run().await {
                tracing::debug!(session_id, error = %e, "session ended");
            }
        }
    }));

    let shutdown = server.shutdown_handle();
    spawn_console_ui(shutdown.clone());

    let sig_shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("caught interrupt, cleaning up");
            sig_shutdown.signal();
        }
    });

    tracing::info!("streaming on rtmp://0.0.0.0:{}", args.port);
    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "failed to start RTMP server, exiting");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "trace" } else { "rtmp_tap=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

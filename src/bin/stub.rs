//! Stub RTMP server
//!
//! Run with: `rtmp-tap-stub [--port 1935] [-z] [-c cert.pem -k key.pem]`
//!
//! Answers each client's invocation handshake locally, prints and records
//! the downloader command line for every play, and spawns the downloader as
//! a detached subprocess. With `-c`/`-k` the listener performs a TLS accept
//! before the RTMP handshake.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use rtmp_tap::server::{spawn_console_ui, Server, ServerConfig};
use rtmp_tap::stub::{StubConfig, StubSession};

#[derive(Parser, Debug)]
#[command(name = "rtmp-tap-stub", version, about = "Stub RTMP server that hands plays to a downloader")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 1935)]
    port: u16,

    /// Verbose logging
    #[arg(short = 'z')]
    verbose: bool,

    /// TLS certificate chain (PEM)
    #[arg(short = 'c', long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(short = 'k', long, requires = "cert")]
    key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    tracing::info!("RTMP stub server {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::default().port(args.port);
    if let (Some(cert), Some(key)) = (args.cert, args.key) {
        config = config.tls(cert, key);
    }

    let stub_config = StubConfig::default();

    let server = Arc::new(Server::new(config, move |session_id, stream, peer_addr| {
        let config = stub_config.clone();
        async move {
            tracing::debug!(session_id, peer = %peer_addr, "accepted connection");
            if let Err(e) = StubSession::new(session_id, stream, config).run().await {
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

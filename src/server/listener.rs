//! Listening server
//!
//! TCP accept loop, optional TLS accept, and per-connection spawn: every
//! accepted client gets a fresh worker task that owns its session for the
//! duration. Shutdown is a watch channel; the signal handler and the console
//! UI both write to it and the accept loop observes it.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use super::config::ServerConfig;
use crate::error::{Error, Result};

/// An accepted client transport: plain TCP or TLS on top of it
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Handle used to stop a running server from signal handlers or the UI
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }
}

/// Listening server
///
/// `handler` runs once per accepted connection, in its own task.
pub struct Server<F> {
    config: ServerConfig,
    handler: Arc<F>,
    next_session_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

impl<F, Fut> Server<F>
where
    F: Fn(u64, ClientStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    pub fn new(config: ServerConfig, handler: F) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            handler: Arc::new(handler),
            next_session_id: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Handle for triggering shutdown from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the accept loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "listening");

        let acceptor = if self.config.tls_enabled() {
            let cert = self.config.tls_cert.as_deref().unwrap_or(Path::new(""));
            let key = self.config.tls_key.as_deref().unwrap_or(Path::new(""));
            Some(load_tls_acceptor(cert, key)?)
        } else {
            None
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.handle_connection(socket, peer_addr, acceptor.clone());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept connection");
                    }
                },
            }
        }

        Ok(())
    }

    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
    ) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id, peer = %peer_addr, "accepted connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(error = %e, "failed to set TCP_NODELAY");
            }
        }

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let stream = match acceptor {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(tls) => ClientStream::Tls(Box::new(tls)),
                    Err(e) => {
                        tracing::error!(session_id, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => ClientStream::Plain(socket),
            };

            handler(session_id, stream, peer_addr).await;
            tracing::debug!(session_id, "connection closed");
        });
    }
}

/// Build a TLS acceptor from PEM certificate and key files
fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| Error::Tls(format!("no private key in {}", key_path.display())))?;

    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Interactive UI on standard input: `q` initiates shutdown, anything else
/// is ignored with a message.
pub fn spawn_console_ui(shutdown: ShutdownHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "q" => {
                    tracing::info!("exiting");
                    shutdown.signal();
                    break;
                }
                "" => {}
                other => {
                    tracing::info!(command = %other, "unknown command, ignoring");
                }
            }
        }
    })
}

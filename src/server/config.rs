//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// TLS certificate chain (PEM); enables TLS accept together with `tls_key`
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::protocol::constants::DEFAULT_PORT)),
            tcp_nodelay: true, // Important for low latency
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the listening port, keeping the wildcard address
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Enable TLS accept with the given certificate and key files
    pub fn tls(mut self, cert: PathBuf, key: PathBuf) -> Self {
        self.tls_cert = Some(cert);
        self.tls_key = Some(key);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.bind_addr.ip().to_string(), "0.0.0.0");
        assert!(config.tcp_nodelay);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_builder_port() {
        let config = ServerConfig::default().port(8935);
        assert_eq!(config.bind_addr.port(), 8935);
    }

    #[test]
    fn test_tls_enabled_requires_both() {
        let mut config = ServerConfig::default();
        config.tls_cert = Some(PathBuf::from("cert.pem"));
        assert!(!config.tls_enabled());
        config.tls_key = Some(PathBuf::from("key.pem"));
        assert!(config.tls_enabled());
    }
}

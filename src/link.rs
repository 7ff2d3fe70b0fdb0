//! Per-session link state
//!
//! Everything captured from the client's `connect` and `play` invocations
//! that the upstream session (or the spawned downloader) needs. Every field
//! is an owned copy; teardown is plain drop with no aliasing into packet
//! buffers.

use crate::amf::AmfProperty;
use crate::protocol::constants::DEFAULT_PORT;

/// Transport announced by the tcUrl scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rtmp,
    Rtmpe,
}

/// Captured streaming parameters for one side of a session
#[derive(Debug, Clone, Default)]
pub struct Link {
    pub app: Option<String>,
    pub flash_ver: Option<String>,
    pub swf_url: Option<String>,
    pub tc_url: Option<String>,
    pub page_url: Option<String>,

    /// Origin host parsed out of tcUrl
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: Option<Protocol>,

    pub playpath: Option<String>,
    pub usher_token: Option<String>,

    /// Command arguments past the command object, in arrival order
    pub extras: Vec<AmfProperty>,
    /// Extras rendered as downloader `-C` flags
    pub extras_flags: String,

    pub audio_codecs: Option<f64>,
    pub video_codecs: Option<f64>,
    pub object_encoding: Option<f64>,

    /// SWF verification digest, injected by an external hasher
    pub swf_hash: Option<[u8; 32]>,
}

impl Link {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            ..Default::default()
        }
    }

    /// Whether the app name marks the stream live (forces `--live`)
    pub fn is_live_app(&self) -> bool {
        self.app.as_deref().is_some_and(|a| a.contains("live"))
    }

    /// Capture `tcUrl` and derive protocol, hostname and port from it.
    ///
    /// The scheme match is case-insensitive. An unknown scheme leaves the
    /// hostname unset; the upstream connect will then fail and terminate
    /// just this session.
    pub fn apply_tc_url(&mut self, url: &str) {
        self.tc_url = Some(url.to_string());

        let b = url.as_bytes();
        if b.len() < 4 || !b[..4].eq_ignore_ascii_case(b"rtmp") {
            return;
        }

        let rest = if b.len() > 4 && b[4] == b':' {
            self.protocol = Some(Protocol::Rtmp);
            &url[4..]
        } else if b.len() > 5 && b[4].eq_ignore_ascii_case(&b'e') && b[5] == b':' {
            self.protocol = Some(Protocol::Rtmpe);
            &url[5..]
        } else {
            return;
        };

        // rest = "://host[:port][/path...]"
        let Some(authority) = rest.strip_prefix("://") else {
            return;
        };

        let host_port = match authority.find('/') {
            Some(idx) => &authority[..idx],
            None => authority,
        };

        match host_port.rfind(':') {
            Some(idx) => {
                self.hostname = Some(host_port[..idx].to_string());
                self.port = host_port[idx + 1..].parse().unwrap_or(DEFAULT_PORT);
            }
            None => {
                self.hostname = Some(host_port.to_string());
                self.port = DEFAULT_PORT;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tc_url_with_port_and_path() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://origin.example:1935/live");
        assert_eq!(link.protocol, Some(Protocol::Rtmp));
        assert_eq!(link.hostname.as_deref(), Some("origin.example"));
        assert_eq!(link.port, 1935);
        assert_eq!(link.tc_url.as_deref(), Some("rtmp://origin.example:1935/live"));
    }

    #[test]
    fn test_tc_url_default_port() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://origin.example/app");
        assert_eq!(link.hostname.as_deref(), Some("origin.example"));
        assert_eq!(link.port, 1935);
    }

    #[test]
    fn test_tc_url_no_path() {
        // No '/' after the host: hostname is the full remainder
        let mut link = Link::new();
        link.apply_tc_url("rtmp://origin.example");
        assert_eq!(link.hostname.as_deref(), Some("origin.example"));
        assert_eq!(link.port, 1935);
    }

    #[test]
    fn test_tc_url_uppercase_scheme() {
        let mut link = Link::new();
        link.apply_tc_url("RTMP://HOST/app");
        assert_eq!(link.protocol, Some(Protocol::Rtmp));
        assert_eq!(link.hostname.as_deref(), Some("HOST"));
    }

    #[test]
    fn test_tc_url_rtmpe() {
        let mut link = Link::new();
        link.apply_tc_url("rtmpe://secure.example:8080/vod");
        assert_eq!(link.protocol, Some(Protocol::Rtmpe));
        assert_eq!(link.hostname.as_deref(), Some("secure.example"));
        assert_eq!(link.port, 8080);
    }

    #[test]
    fn test_tc_url_unknown_scheme() {
        let mut link = Link::new();
        link.apply_tc_url("http://web.example/page");
        assert_eq!(link.protocol, None);
        assert_eq!(link.hostname, None);
        // Raw value still captured for the command line
        assert_eq!(link.tc_url.as_deref(), Some("http://web.example/page"));
    }

    #[test]
    fn test_tc_url_bad_port_falls_back() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://host:notaport/app");
        assert_eq!(link.hostname.as_deref(), Some("host"));
        assert_eq!(link.port, 1935);
    }

    #[test]
    fn test_is_live_app() {
        let mut link = Link::new();
        assert!(!link.is_live_app());
        link.app = Some("live".to_string());
        assert!(link.is_live_app());
        link.app = Some("somelivechannel".to_string());
        assert!(link.is_live_app());
        link.app = Some("vod".to_string());
        assert!(!link.is_live_app());
    }
}

//! Client configuration and stream URL parsing

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkingMode, DecoderConfig, Fmt3Timestamp};
use crate::protocol::constants::RTMP_PORT;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTMP URL to connect to (rtmp://host[:port]/app/stream)
    pub url: String,

    /// Bounds TCP connect and the handshake
    pub connect_timeout: Duration,

    /// Socket read timeout. Expiry means "no data yet", not failure.
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Delay between closing the old socket and reconnecting
    pub reconnect_backoff: Duration,

    /// Pause after a read returned no data
    pub idle_backoff: Duration,

    /// Consecutive failed reconnects before processing gives up (0 = never reconnect)
    pub max_reconnect_attempts: u32,

    /// Chunk decoder options
    pub decoder: DecoderConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
            read_buffer_size: 64 * 1024, // 64KB
            reconnect_backoff: Duration::from_secs(2),
            idle_backoff: Duration::from_millis(10),
            max_reconnect_attempts: 3,
            decoder: DecoderConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse URL into a stream target
    pub fn parse_url(&self) -> Result<StreamTarget> {
        StreamTarget::parse(&self.url)
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set reconnect backoff
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set idle backoff
    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Set maximum consecutive reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Select how chunk payloads are framed
    pub fn chunking(mut self, mode: ChunkingMode) -> Self {
        self.decoder.chunking = mode;
        self
    }

    /// Select type 3 timestamp handling
    pub fn fmt3_timestamp(mut self, policy: Fmt3Timestamp) -> Self {
        self.decoder.fmt3_timestamp = policy;
        self
    }
}

/// Where to connect, derived from a stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Empty when the URL has no authority
    pub host: String,
    pub port: u16,
    pub application: String,
    /// Remaining path segments joined with `/`, empty if absent
    pub stream_key: String,
}

impl StreamTarget {
    /// Parse `scheme://[user@]host[:port]/app[/key...]`
    ///
    /// The scheme is not checked. A URL without a host yields an empty host;
    /// only an unparsable port is an error.
    pub fn parse(url: &str) -> Result<Self> {
        let (authority, path) = match url.split_once("://") {
            Some((_, rest)) => match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            },
            None => ("", url),
        };

        let authority = authority
            .rsplit_once('@')
            .map(|(_, host_port)| host_port)
            .unwrap_or(authority);
        let (host, port) = split_host_port(authority)?;

        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = path.strip_prefix('/').unwrap_or(path);
        let (application, stream_key) = match path.split_once('/') {
            Some((app, key)) => (app, key),
            None => (path, ""),
        };

        let target = StreamTarget {
            host: host.to_string(),
            port,
            application: application.to_string(),
            stream_key: stream_key.to_string(),
        };

        tracing::debug!(
            host = %target.host,
            port = target.port,
            app = %target.application,
            stream = %target.stream_key,
            "Parsed stream URL"
        );

        Ok(target)
    }

    /// `host:port` for socket connect
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(authority: &str) -> Result<(&str, u16)> {
    // Bracketed IPv6 literal
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("Unterminated IPv6 host: {}", authority)))?;
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, parse_port(port)?)),
            None => Ok((host, RTMP_PORT)),
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((authority, RTMP_PORT)),
    }
}

fn parse_port(port: &str) -> Result<u16> {
    if port.is_empty() {
        return Ok(RTMP_PORT);
    }
    port.parse()
        .map_err(|_| Error::Config(format!("Invalid port: {}", port)))
}

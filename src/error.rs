//! Unified error types for rtmp-ingest

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all ingest operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// Chunk stream framing violation
    Protocol(ProtocolError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Media parsing error
    Media(MediaError),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// No connection is established
    NotConnected,
    /// Another reconnect attempt is already running
    ReconnectInProgress,
    /// Invalid configuration or stream target
    Config(String),
}

impl Error {
    /// Whether the error means the transport itself is gone.
    ///
    /// Transport errors are fatal to the current connection and recovered
    /// through reconnect. Everything else is scoped to a single message.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Handshake(_)
                | Error::Timeout
                | Error::ConnectionClosed
                | Error::NotConnected
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::NotConnected => write!(f, "Not connected"),
            Error::ReconnectInProgress => write!(f, "Reconnect already in progress"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Media(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

/// Chunk stream framing errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Basic header uses the 2- or 3-byte chunk stream id encoding
    UnsupportedChunkStreamId(u8),
    /// Continuation header arrived before any full header on this chunk stream
    MissingChunkHeader { csid: u32, fmt: u8 },
    MessageTooLarge { size: u32, max: u32 },
    /// Stream ended in the middle of a chunk
    IncompleteMessage { expected: usize, received: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedChunkStreamId(id) => {
                write!(f, "Unsupported extended chunk stream ID encoding: {}", id)
            }
            ProtocolError::MissingChunkHeader { csid, fmt } => {
                write!(f, "No previous header for chunk stream {} (fmt {})", csid, fmt)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::IncompleteMessage { expected, received } => {
                write!(f, "Incomplete message: {}/{} bytes", received, expected)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    /// Peer closed before the full S0S1S2 response arrived
    Incomplete { received: usize },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Incomplete { received } => {
                write!(f, "Incomplete handshake response: {} bytes", received)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Media parsing errors
#[derive(Debug)]
pub enum MediaError {
    EmptyVideoTag,
    InvalidAvcPacket,
    UnsupportedCodec(u8),
    /// NALU packet without any elementary stream data
    TruncatedNalu(usize),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::EmptyVideoTag => write!(f, "Empty video tag"),
            MediaError::InvalidAvcPacket => write!(f, "Invalid AVC packet"),
            MediaError::UnsupportedCodec(c) => write!(f, "Unsupported video codec: {}", c),
            MediaError::TruncatedNalu(len) => write!(f, "NALU packet too short: {} bytes", len),
        }
    }
}

impl std::error::Error for MediaError {}

//! RTMP client connection
//!
//! Owns one transport after a successful handshake and turns its bytes into
//! [`Message`]s.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::ChunkDecoder;
use crate::protocol::handshake;
use crate::protocol::message::Message;

use super::config::{ClientConfig, StreamTarget};

/// Handshaken connection to an RTMP server
pub struct Connection<S = TcpStream> {
    stream: S,
    read_buf: BytesMut,
    chunk_decoder: ChunkDecoder,
    read_timeout: std::time::Duration,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `target` and run the handshake
    pub async fn connect(target: &StreamTarget, config: &ClientConfig) -> Result<Self> {
        if target.host.is_empty() {
            return Err(Error::Config("Stream URL has no host".into()));
        }

        let addr = target.address();
        tracing::debug!(addr = %addr, "Connecting");

        let socket = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Io)?;

        if config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Self::establish(socket, config).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over an already connected stream
    pub async fn establish(mut stream: S, config: &ClientConfig) -> Result<Self> {
        timeout(config.connect_timeout, handshake::perform(&mut stream))
            .await
            .map_err(|_| Error::Timeout)??;

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            chunk_decoder: ChunkDecoder::with_config(config.decoder.clone()),
            read_timeout: config.read_timeout,
        })
    }

    /// Read the next RTMP message
    ///
    /// Returns `Ok(None)` when the read timeout expires before a message is
    /// complete; buffered bytes are kept for the next call. End of stream is
    /// `Error::ConnectionClosed`, or `IncompleteMessage` if it cut a chunk short.
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(msg) = self.chunk_decoder.decode(&mut self.read_buf)? {
                self.apply_protocol_control(&msg);
                return Ok(Some(msg));
            }

            let read = timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf)).await;
            match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    if self.read_buf.is_empty() {
                        return Err(Error::ConnectionClosed);
                    }
                    let received = self.read_buf.len();
                    let expected = self.chunk_decoder.pending_len().max(received);
                    self.read_buf.clear();
                    return Err(ProtocolError::IncompleteMessage { expected, received }.into());
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(Error::Io(e)),
            }
        }
    }

    /// Chunk-level control messages are applied before the message is handed on
    fn apply_protocol_control(&mut self, msg: &Message) {
        if let Some(size) = msg.set_chunk_size() {
            tracing::debug!(size = size, "Peer set chunk size");
            self.chunk_decoder.set_chunk_size(size);
        } else if let Some(csid) = msg.abort_csid() {
            tracing::debug!(csid = csid, "Peer aborted message");
            self.chunk_decoder.abort(csid);
        }
    }

    pub fn decoder(&self) -> &ChunkDecoder {
        &self.chunk_decoder
    }
}

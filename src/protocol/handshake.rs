//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+filler) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes) ---------------|
//!   |<------ S2 (1536 bytes) ---------------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! This is the minimal "simple" handshake: no HMAC digest, no version
//! negotiation, and S2 is not compared against C1. Success only requires the
//! complete 3073-byte response to arrive.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{
    HANDSHAKE_REQUEST_SIZE, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE, RTMP_VERSION,
};

/// Run the client side of the handshake over an already connected stream.
pub async fn perform<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let c0c1 = generate_c0c1();
    stream.write_all(&c0c1).await?;
    stream.flush().await?;

    let mut response = vec![0u8; HANDSHAKE_RESPONSE_SIZE];
    let received = read_full(stream, &mut response).await?;
    if received < HANDSHAKE_RESPONSE_SIZE {
        return Err(HandshakeError::Incomplete { received }.into());
    }

    if response[0] != RTMP_VERSION {
        tracing::warn!(version = response[0], "Unexpected S0 version, continuing");
    }

    stream.write_all(c2_from_response(&response)).await?;
    stream.flush().await?;

    tracing::debug!("Handshake complete");
    Ok(())
}

/// Read until `buf` is full or the peer closes. Returns the byte count read.
async fn read_full<S>(stream: &mut S, buf: &mut [u8]) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut total = 0;
    while total < buf.len() {
        let n = stream.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Build C0 + C1 (1 + 1536 bytes)
///
/// C1 layout:
/// - Bytes 0-3: Timestamp in seconds (32-bit, big-endian)
/// - Bytes 4-7: Zero
/// - Bytes 8-1535: Filler
pub fn generate_c0c1() -> Bytes {
    let mut buf = BytesMut::with_capacity(HANDSHAKE_REQUEST_SIZE);
    buf.put_u8(RTMP_VERSION);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    buf.put_u32(timestamp);
    buf.put_u32(0);

    // Not cryptographically secure; the simple handshake doesn't need it
    let mut seed = timestamp as u64 | 1;
    let mut filler = [0u8; HANDSHAKE_SIZE - 8];
    for chunk in filler.chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    buf.put_slice(&filler);

    buf.freeze()
}

/// C2 is the server's S1 echoed back verbatim.
///
/// `response` must hold the full S0S1S2 exchange.
pub fn c2_from_response(response: &[u8]) -> &[u8] {
    &response[1..1 + HANDSHAKE_SIZE]
}

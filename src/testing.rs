//! Loopback RTMP peers for tests

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::chunk::tests::fmt0;
use crate::protocol::constants::*;

/// Server side of the simple handshake: S1 is filler, S2 echoes C1
pub(crate) async fn serve_handshake<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut c0c1 = vec![0u8; HANDSHAKE_REQUEST_SIZE];
    stream.read_exact(&mut c0c1).await?;

    let mut response = Vec::with_capacity(HANDSHAKE_RESPONSE_SIZE);
    response.push(RTMP_VERSION);
    response.extend_from_slice(&[0x5A; HANDSHAKE_SIZE]);
    response.extend_from_slice(&c0c1[1..]);
    stream.write_all(&response).await?;

    let mut c2 = vec![0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut c2).await?;
    Ok(())
}

/// Keep a connection open until the client goes away
pub(crate) async fn hold_open(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

/// Video message on chunk stream 6
pub(crate) fn video_message(timestamp: u32, payload: &[u8]) -> BytesMut {
    fmt0(6, timestamp, MSG_VIDEO, 1, payload)
}

/// AVC NALU tag body with the given frame type nibble
pub(crate) fn nalu_payload(frame_type: u8, marker: u8) -> Vec<u8> {
    vec![(frame_type << 4) | 7, 0x01, 0, 0, 0, 0, 0, 0, 1, marker]
}

/// Accept loop running `handler` after a successful handshake.
///
/// The handler gets the accepted stream and its zero-based connection index.
/// Returns the URL to connect to and the accept counter.
pub(crate) async fn spawn_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(TcpStream, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = accepts.clone();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            tokio::spawn(async move {
                if serve_handshake(&mut socket).await.is_ok() {
                    handler(socket, index).await;
                }
            });
        }
    });

    (format!("rtmp://{}/live/test", addr), accepts)
}

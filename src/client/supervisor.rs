//! Connection supervisor
//!
//! [`IngestClient`] owns at most one live [`Connection`] and is shared through
//! an `Arc` between the application and the processing worker. Connection
//! state is published on a watch channel.
//!
//! Every `connect` or `reconnect` opens a session guarded by a cancellation
//! token. `disconnect` cancels it, so an attempt still in flight never
//! commits a connection afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::message::Message;

use super::config::{ClientConfig, StreamTarget};
use super::connector::Connection;

/// Lifecycle of the client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
    Reconnecting,
}

/// RTMP ingest client
pub struct IngestClient {
    target: StreamTarget,
    config: ClientConfig,
    connection: tokio::sync::Mutex<Option<Connection>>,
    /// Token of the current session. Connection flags and state are only
    /// committed while holding this lock.
    session: Mutex<CancellationToken>,
    connected: AtomicBool,
    /// Set by `disconnect`, cleared by `connect` and `reconnect`
    closed_by_user: AtomicBool,
    reconnecting: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl IngestClient {
    /// Create a client for `config.url`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let target = config.parse_url()?;
        Ok(Self::with_target(target, config))
    }

    /// Create a client for an already parsed target
    pub fn with_target(target: StreamTarget, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let session = CancellationToken::new();
        session.cancel();
        Self {
            target,
            config,
            connection: tokio::sync::Mutex::new(None),
            session: Mutex::new(session),
            connected: AtomicBool::new(false),
            closed_by_user: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            state,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the last close came from [`IngestClient::disconnect`]
    pub fn is_closed_by_user(&self) -> bool {
        self.closed_by_user.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect and handshake, replacing any existing connection
    ///
    /// A `disconnect` while this is in flight makes it fail with
    /// `ConnectionClosed`.
    pub async fn connect(&self) -> Result<()> {
        let session = self.begin_session(ConnectionState::Handshaking, true)?;
        self.establish(&session).await
    }

    /// Read the next message from the current connection
    ///
    /// `Ok(None)` means the read timed out with no complete message. A
    /// transport error drops the connection; framing errors leave it open.
    pub async fn read_message(&self) -> Result<Option<Message>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let session = self.lock_session().clone();
        if session.is_cancelled() {
            return Err(Error::NotConnected);
        }

        let mut slot = self.connection.lock().await;
        let conn = slot.as_mut().ok_or(Error::NotConnected)?;

        let result = tokio::select! {
            biased;
            _ = session.cancelled() => Err(Error::ConnectionClosed),
            result = conn.read_message() => result,
        };

        if let Err(e) = &result {
            if e.is_transport() {
                slot.take();
                self.mark_lost(&session, e);
            }
        }
        if session.is_cancelled() {
            slot.take();
        }

        result
    }

    /// Close the connection. Never blocks; a read in flight returns
    /// `ConnectionClosed` and a connect in flight is abandoned.
    pub fn disconnect(&self) {
        let was_connected = {
            let session = self.lock_session();
            session.cancel();
            self.closed_by_user.store(true, Ordering::Release);
            self.set_state(ConnectionState::Disconnected);
            self.connected.swap(false, Ordering::AcqRel)
        };
        self.drop_connection();
        if was_connected {
            tracing::info!(addr = %self.target.address(), "Disconnected");
        }
    }

    /// Close, wait out the reconnect backoff, then connect again
    ///
    /// Fails with `ReconnectInProgress` if another reconnect is running, and
    /// with `ConnectionClosed` if `disconnect` is called before it completes.
    pub async fn reconnect(&self) -> Result<()> {
        self.reconnect_session(true).await
    }

    /// Reconnect on behalf of the processing worker. Refuses when the
    /// application closed the connection itself.
    pub(crate) async fn recover(&self) -> Result<()> {
        self.reconnect_session(false).await
    }

    async fn reconnect_session(&self, explicit: bool) -> Result<()> {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Reconnect already in progress");
            return Err(Error::ReconnectInProgress);
        }

        let session = match self.begin_session(ConnectionState::Reconnecting, explicit) {
            Ok(session) => session,
            Err(e) => {
                self.reconnecting.store(false, Ordering::Release);
                tracing::debug!("Connection closed by user, not reconnecting");
                return Err(e);
            }
        };
        let _guard = ReconnectGuard {
            client: self,
            session: session.clone(),
        };

        tracing::info!(
            addr = %self.target.address(),
            backoff_ms = self.config.reconnect_backoff.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            biased;
            _ = session.cancelled() => return Err(Error::ConnectionClosed),
            _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
        }
        self.establish(&session).await
    }

    /// Cancel the previous session and start a new one in `state`
    ///
    /// Without `explicit`, a session closed by the user is not reopened.
    fn begin_session(&self, state: ConnectionState, explicit: bool) -> Result<CancellationToken> {
        let token = {
            let mut session = self.lock_session();
            if !explicit && self.is_closed_by_user() {
                return Err(Error::ConnectionClosed);
            }
            session.cancel();
            *session = CancellationToken::new();
            self.closed_by_user.store(false, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            self.set_state(state);
            session.clone()
        };
        self.drop_connection();
        Ok(token)
    }

    async fn establish(&self, session: &CancellationToken) -> Result<()> {
        self.set_state_if_current(session, ConnectionState::Handshaking);

        let addr = self.target.address();
        tracing::info!(
            addr = %addr,
            app = %self.target.application,
            stream = %self.target.stream_key,
            "Connecting to RTMP server"
        );

        let result = tokio::select! {
            biased;
            _ = session.cancelled() => Err(Error::ConnectionClosed),
            result = Connection::connect(&self.target, &self.config) => result,
        };

        match result {
            Ok(conn) => {
                let mut slot = self.connection.lock().await;
                if !self.commit(session, &mut slot, conn) {
                    tracing::debug!(addr = %addr, "Connection abandoned after disconnect");
                    return Err(Error::ConnectionClosed);
                }
                drop(slot);
                if session.is_cancelled() {
                    // Disconnected while the slot was still held
                    self.drop_connection();
                    return Err(Error::ConnectionClosed);
                }
                tracing::info!(addr = %addr, "Connected");
                Ok(())
            }
            Err(e) => {
                if self.set_state_if_current(session, ConnectionState::Disconnected) {
                    tracing::warn!(addr = %addr, error = %e, "Connection failed");
                }
                Err(e)
            }
        }
    }

    /// Install `conn` unless the session was cancelled meanwhile
    fn commit(&self, session: &CancellationToken, slot: &mut Option<Connection>, conn: Connection) -> bool {
        let _current = self.lock_session();
        if session.is_cancelled() {
            return false;
        }
        *slot = Some(conn);
        self.connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        true
    }

    fn mark_lost(&self, session: &CancellationToken, error: &Error) {
        let _current = self.lock_session();
        if session.is_cancelled() {
            return;
        }
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::warn!(error = %error, "Connection lost");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Set state if `session` is still the live one. Returns whether it was.
    fn set_state_if_current(&self, session: &CancellationToken, state: ConnectionState) -> bool {
        let _current = self.lock_session();
        if session.is_cancelled() {
            return false;
        }
        self.set_state(state);
        true
    }

    fn drop_connection(&self) {
        // A reader holding the lock drops the connection itself on cancel
        if let Ok(mut slot) = self.connection.try_lock() {
            slot.take();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn lock_session(&self) -> MutexGuard<'_, CancellationToken> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestClient")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for IngestClient {
    fn drop(&mut self) {
        self.lock_session().cancel();
    }
}

/// Clears the reconnect flag when a reconnect finishes or is cancelled
struct ReconnectGuard<'a> {
    client: &'a IngestClient,
    session: CancellationToken,
}

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        let client = self.client;
        client.reconnecting.store(false, Ordering::Release);
        if !client.is_connected() {
            client.set_state_if_current(&self.session, ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hold_open, spawn_server, video_message};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn test_config(url: &str) -> ClientConfig {
        ClientConfig::new(url)
            .connect_timeout(Duration::from_secs(2))
            .read_timeout(Duration::from_millis(50))
            .reconnect_backoff(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_connect_and_read() {
        let (url, accepts) = spawn_server(|mut socket, _| async move {
            socket
                .write_all(&video_message(0, &[0x17, 0x00, 0, 0, 0, 1]))
                .await
                .unwrap();
            hold_open(socket).await;
        })
        .await;

        let client = IngestClient::new(test_config(&url)).unwrap();
        let mut states = client.subscribe_state();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        let msg = client.read_message().await.unwrap().unwrap();
        assert_eq!(msg.type_id, crate::protocol::constants::MSG_VIDEO);
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_host_fails_fast() {
        let client = IngestClient::new(test_config("rtmp:///live/key")).unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = IngestClient::new(test_config(&format!("rtmp://{}/live/x", addr))).unwrap();
        let err = client.connect().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_cut_short() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut c0c1 = vec![0u8; 1537];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut c0c1)
                .await
                .unwrap();
            socket.write_all(&[3u8; 2000]).await.unwrap();
        });

        let client = IngestClient::new(test_config(&format!("rtmp://{}/live/x", addr))).unwrap();
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let (url, _) = spawn_server(|socket, _| hold_open(socket)).await;
        let client = IngestClient::new(test_config(&url)).unwrap();
        client.connect().await.unwrap();

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.read_message().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_interrupts_read() {
        let (url, _) = spawn_server(|socket, _| hold_open(socket)).await;
        let config = test_config(&url).read_timeout(Duration::from_secs(30));
        let client = Arc::new(IngestClient::new(config).unwrap());
        client.connect().await.unwrap();

        let reader = {
            let client = client.clone();
            tokio::spawn(async move { client.read_message().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (url, _) = spawn_server(|socket, _| async move { drop(socket) }).await;
        let client = IngestClient::new(test_config(&url)).unwrap();
        client.connect().await.unwrap();

        let err = loop {
            match client.read_message().await {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(err.is_transport());
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_reconnect_single_attempt() {
        let (url, accepts) = spawn_server(|socket, _| hold_open(socket)).await;
        let client = IngestClient::new(test_config(&url)).unwrap();
        client.connect().await.unwrap();

        let (first, second) = tokio::join!(client.reconnect(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let started = Instant::now();
            let result = client.reconnect().await;
            (result, started.elapsed())
        });

        first.unwrap();
        let (second, elapsed) = second;
        assert!(matches!(second, Err(Error::ReconnectInProgress)));
        assert!(elapsed < Duration::from_millis(50));
        assert!(client.is_connected());
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 2);

        // Flag is released once the reconnect completes
        client.reconnect().await.unwrap();
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disconnect_abandons_connect_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Stall the handshake well past the disconnect
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = crate::testing::serve_handshake(&mut socket).await;
            hold_open(socket).await;
        });

        let client = Arc::new(IngestClient::new(test_config(&format!("rtmp://{}/live/x", addr))).unwrap());
        let attempt = {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state(), ConnectionState::Handshaking);

        client.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), attempt)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_during_reconnect_backoff() {
        let (url, accepts) = spawn_server(|socket, _| hold_open(socket)).await;
        let config = test_config(&url).reconnect_backoff(Duration::from_millis(300));
        let client = Arc::new(IngestClient::new(config).unwrap());
        client.connect().await.unwrap();

        let attempt = {
            let client = client.clone();
            tokio::spawn(async move { client.reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.disconnect();
        let result = tokio::time::timeout(Duration::from_secs(1), attempt)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 1);

        // The flag was released; an explicit reconnect still works
        client.reconnect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_recover_refused_after_disconnect() {
        let (url, accepts) = spawn_server(|socket, _| hold_open(socket)).await;
        let client = IngestClient::new(test_config(&url)).unwrap();
        client.connect().await.unwrap();
        assert!(!client.is_closed_by_user());

        client.disconnect();
        assert!(client.is_closed_by_user());
        assert!(matches!(client.recover().await, Err(Error::ConnectionClosed)));
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 1);

        client.connect().await.unwrap();
        assert!(!client.is_closed_by_user());
        assert_eq!(client.state(), ConnectionState::Connected);
    }
}

//! Frame processing worker
//!
//! Runs the read loop on a spawned task: read a message, demultiplex it, hand
//! the result to the sink. Lost connections are re-established until the
//! attempt limit is reached; a connection closed with
//! [`IngestClient::disconnect`] ends processing instead.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::media::demux::Demuxer;
use crate::media::sink::{deliver, FrameSink, MediaEvent};
use crate::stats::{IngestCounters, IngestStats};

use super::supervisor::IngestClient;

/// Owner of the processing worker
#[derive(Debug, Default)]
pub struct FrameProcessor {
    counters: Arc<IngestCounters>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl FrameProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the worker reading from `client` into `sink`
    ///
    /// Must be called from within a Tokio runtime. Does nothing if a worker
    /// is already running.
    pub fn start_processing<S: FrameSink>(&mut self, client: Arc<IngestClient>, sink: S) {
        if self.is_processing() {
            tracing::warn!("Frame processing already running");
            return;
        }

        let cancel = CancellationToken::new();
        let worker = Worker {
            client,
            sink,
            demuxer: Demuxer::with_counters(self.counters.clone()),
            cancel: cancel.clone(),
        };

        self.handle = Some(tokio::spawn(worker.run()));
        self.cancel = Some(cancel);
    }

    /// Signal the worker to stop
    ///
    /// Returns immediately. No sink callback starts after this returns; one
    /// already running is dropped at its next await point.
    pub fn stop_processing(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            tracing::info!("Stopping frame processing");
        }
    }

    pub fn is_processing(&self) -> bool {
        let signalled = self.cancel.as_ref().map_or(true, |c| c.is_cancelled());
        let finished = self.handle.as_ref().map_or(true, |h| h.is_finished());
        !signalled && !finished
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Wait for the worker to exit
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Processing worker failed");
            }
        }
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

struct Worker<S> {
    client: Arc<IngestClient>,
    sink: S,
    demuxer: Demuxer,
    cancel: CancellationToken,
}

impl<S: FrameSink> Worker<S> {
    async fn run(mut self) {
        let max_attempts = self.client.config().max_reconnect_attempts;
        let idle_backoff = self.client.config().idle_backoff;
        let mut failed_reconnects = 0u32;

        tracing::info!(stream = %self.client.target().stream_key, "Frame processing started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.client.is_connected() {
                if self.client.is_closed_by_user() {
                    tracing::info!("Client disconnected, ending frame processing");
                    break;
                }
                if max_attempts == 0 {
                    tracing::info!("Connection lost, reconnect disabled");
                    break;
                }
                if failed_reconnects >= max_attempts {
                    tracing::error!(attempts = failed_reconnects, "Giving up on reconnect");
                    break;
                }

                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    result = self.client.recover() => result,
                };
                match result {
                    Ok(()) => {
                        failed_reconnects = 0;
                        self.demuxer.counters().record_reconnect();
                    }
                    Err(Error::ReconnectInProgress) => {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(idle_backoff) => {}
                        }
                    }
                    Err(e) => {
                        failed_reconnects += 1;
                        tracing::warn!(
                            error = %e,
                            attempt = failed_reconnects,
                            max = max_attempts,
                            "Reconnect failed"
                        );
                    }
                }
                continue;
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                read = self.client.read_message() => read,
            };

            match read {
                Ok(Some(msg)) => {
                    tracing::trace!(
                        csid = msg.csid,
                        type_id = msg.type_id,
                        timestamp = msg.timestamp,
                        size = msg.payload.len(),
                        "Message"
                    );
                    let Some(event) = self.demuxer.dispatch(&msg) else {
                        continue;
                    };
                    if !self.deliver_event(event).await {
                        break;
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle_backoff) => {}
                    }
                }
                Err(e) if e.is_transport() => {
                    tracing::debug!(error = %e, "Read failed");
                }
                Err(e) => {
                    self.demuxer.counters().record_framing_error();
                    tracing::debug!(error = %e, "Framing error, message skipped");
                }
            }
        }

        tracing::info!("Frame processing stopped");
    }

    /// Hand `event` to the sink unless cancelled first, even when the sink
    /// is ready immediately. Returns false on cancel.
    async fn deliver_event(&mut self, event: MediaEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = deliver(&mut self.sink, event) => true,
        }
    }
}

//! Frame delivery
//!
//! The demuxer produces [`MediaEvent`]s; a [`FrameSink`] consumes them on the
//! processing worker, one at a time and in wire order.
//!
//! Three sinks are provided:
//! - `mpsc::Sender<MediaEvent>`: forwards every event over a bounded channel
//! - [`FnSink`]: wraps a `(frame type, elementary bytes)` callback
//! - [`DecoderSink`]: feeds an external [`DecodeStage`]

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::media::flv::VideoFrameType;

/// Elementary stream data extracted from one AVC NALU message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Message timestamp (milliseconds)
    pub timestamp: u32,
    pub frame_type: VideoFrameType,
    /// Composition time offset (milliseconds)
    pub composition_time: i32,
    /// Length-prefixed NAL units
    pub data: Bytes,
}

/// Output of the demuxer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Decodable video frame
    Frame(VideoFrame),
    /// AVCDecoderConfigurationRecord (SPS/PPS)
    SequenceHeader { timestamp: u32, record: Bytes },
    EndOfSequence { timestamp: u32 },
    /// Raw data message body (onMetaData), not parsed
    Metadata { timestamp: u32, payload: Bytes },
}

/// Consumer of demultiplexed media
///
/// Only `on_frame` is required; the other events are ignored by default.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Called for every AVC NALU packet
    async fn on_frame(&mut self, frame: VideoFrame);

    /// Called for every AVC sequence header. Decoders need this before frames.
    async fn on_sequence_header(&mut self, _timestamp: u32, _record: Bytes) {}

    async fn on_end_of_sequence(&mut self, _timestamp: u32) {}

    /// Called for data messages (usually onMetaData)
    async fn on_metadata(&mut self, _timestamp: u32, _payload: Bytes) {}
}

/// Route one event to the matching sink callback
pub(crate) async fn deliver<S: FrameSink + ?Sized>(sink: &mut S, event: MediaEvent) {
    match event {
        MediaEvent::Frame(frame) => sink.on_frame(frame).await,
        MediaEvent::SequenceHeader { timestamp, record } => {
            sink.on_sequence_header(timestamp, record).await
        }
        MediaEvent::EndOfSequence { timestamp } => sink.on_end_of_sequence(timestamp).await,
        MediaEvent::Metadata { timestamp, payload } => sink.on_metadata(timestamp, payload).await,
    }
}

async fn forward(tx: &mpsc::Sender<MediaEvent>, event: MediaEvent) {
    if tx.send(event).await.is_err() {
        tracing::debug!("Media event receiver dropped");
    }
}

#[async_trait]
impl FrameSink for mpsc::Sender<MediaEvent> {
    async fn on_frame(&mut self, frame: VideoFrame) {
        forward(self, MediaEvent::Frame(frame)).await;
    }

    async fn on_sequence_header(&mut self, timestamp: u32, record: Bytes) {
        forward(self, MediaEvent::SequenceHeader { timestamp, record }).await;
    }

    async fn on_end_of_sequence(&mut self, timestamp: u32) {
        forward(self, MediaEvent::EndOfSequence { timestamp }).await;
    }

    async fn on_metadata(&mut self, timestamp: u32, payload: Bytes) {
        forward(self, MediaEvent::Metadata { timestamp, payload }).await;
    }
}

/// Sink calling a closure for each elementary frame
pub struct FnSink<F>(F);

/// Wrap an `on elementary frame` callback as a [`FrameSink`]
pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(VideoFrameType, Bytes) + Send + 'static,
{
    FnSink(f)
}

#[async_trait]
impl<F> FrameSink for FnSink<F>
where
    F: FnMut(VideoFrameType, Bytes) + Send + 'static,
{
    async fn on_frame(&mut self, frame: VideoFrame) {
        (self.0)(frame.frame_type, frame.data);
    }
}

/// Video decoder living outside this crate
///
/// Accepts the codec configuration and per-frame NAL units and produces
/// pixels on its own terms. Implementations must cache the sequence header.
pub trait DecodeStage: Send + 'static {
    fn submit_sequence_header(&mut self, record: &[u8]);

    fn submit_frame(&mut self, frame_type: VideoFrameType, nalus: &[u8]);

    fn end_of_sequence(&mut self) {}
}

/// Adapter feeding a [`DecodeStage`] from the processing worker
pub struct DecoderSink<D> {
    stage: D,
}

impl<D: DecodeStage> DecoderSink<D> {
    pub fn new(stage: D) -> Self {
        Self { stage }
    }

    pub fn stage(&self) -> &D {
        &self.stage
    }

    pub fn into_inner(self) -> D {
        self.stage
    }
}

#[async_trait]
impl<D: DecodeStage> FrameSink for DecoderSink<D> {
    async fn on_frame(&mut self, frame: VideoFrame) {
        self.stage.submit_frame(frame.frame_type, &frame.data);
    }

    async fn on_sequence_header(&mut self, _timestamp: u32, record: Bytes) {
        self.stage.submit_sequence_header(&record);
    }

    async fn on_end_of_sequence(&mut self, _timestamp: u32) {
        self.stage.end_of_sequence();
    }
}

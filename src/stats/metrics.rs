//! Counters for an ingest session

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated from the processing worker
#[derive(Debug, Default)]
pub struct IngestCounters {
    messages: AtomicU64,
    bytes_received: AtomicU64,
    video_messages: AtomicU64,
    audio_messages: AtomicU64,
    metadata_messages: AtomicU64,
    control_messages: AtomicU64,
    keyframes: AtomicU64,
    inter_frames: AtomicU64,
    sequence_headers: AtomicU64,
    dropped_messages: AtomicU64,
    framing_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`IngestCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Total messages reassembled
    pub messages: u64,
    /// Total payload bytes of reassembled messages
    pub bytes_received: u64,
    pub video_messages: u64,
    pub audio_messages: u64,
    pub metadata_messages: u64,
    pub control_messages: u64,
    /// Frames delivered as keyframes
    pub keyframes: u64,
    /// Frames delivered as inter frames
    pub inter_frames: u64,
    pub sequence_headers: u64,
    /// Messages dropped by the demuxer (unsupported codec, malformed tag)
    pub dropped_messages: u64,
    /// Chunk framing errors
    pub framing_errors: u64,
    /// Successful reconnects
    pub reconnects: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_message(&self, payload_len: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    counter! {
        record_video => video_messages,
        record_audio => audio_messages,
        record_metadata => metadata_messages,
        record_control => control_messages,
        record_keyframe => keyframes,
        record_inter_frame => inter_frames,
        record_sequence_header => sequence_headers,
        record_dropped => dropped_messages,
        record_framing_error => framing_errors,
        record_reconnect => reconnects,
    }

    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            messages: self.messages.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            video_messages: self.video_messages.load(Ordering::Relaxed),
            audio_messages: self.audio_messages.load(Ordering::Relaxed),
            metadata_messages: self.metadata_messages.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            inter_frames: self.inter_frames.load(Ordering::Relaxed),
            sequence_headers: self.sequence_headers.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl IngestStats {
    /// Video frames delivered to the sink
    pub fn frames(&self) -> u64 {
        self.keyframes + self.inter_frames
    }
}

//! Message demultiplexer
//!
//! Routes reassembled messages by type. Video messages are parsed down to AVC
//! elementary stream data; audio is only counted; data messages are passed
//! through unparsed. Malformed or unsupported payloads are dropped here and
//! never reach the connection.

use std::sync::Arc;

use crate::error::{Error, MediaError};
use crate::media::avc::{AvcPacketType, VideoTag};
use crate::media::sink::{MediaEvent, VideoFrame};
use crate::protocol::message::{Message, MessageKind};
use crate::stats::IngestCounters;

/// Stateless router from [`Message`] to [`MediaEvent`]
#[derive(Debug, Default)]
pub struct Demuxer {
    counters: Arc<IngestCounters>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share counters with an owner that reports them
    pub fn with_counters(counters: Arc<IngestCounters>) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> &Arc<IngestCounters> {
        &self.counters
    }

    /// Route one message. Returns the event to deliver, if any.
    pub fn dispatch(&self, msg: &Message) -> Option<MediaEvent> {
        self.counters.record_message(msg.payload.len());

        match msg.kind() {
            MessageKind::Video => {
                self.counters.record_video();
                self.demux_video(msg)
            }
            MessageKind::Audio => {
                self.counters.record_audio();
                tracing::trace!(size = msg.payload.len(), "Audio message");
                None
            }
            MessageKind::Metadata => {
                self.counters.record_metadata();
                tracing::debug!(size = msg.payload.len(), "Data message");
                Some(MediaEvent::Metadata {
                    timestamp: msg.timestamp,
                    payload: msg.payload.clone(),
                })
            }
            MessageKind::Control => {
                self.counters.record_control();
                None
            }
            MessageKind::Other(type_id) => {
                tracing::trace!(type_id = type_id, "Ignoring message");
                None
            }
        }
    }

    fn demux_video(&self, msg: &Message) -> Option<MediaEvent> {
        let tag = match VideoTag::parse(&msg.payload) {
            Ok(tag) => tag,
            Err(Error::Media(MediaError::UnsupportedCodec(codec))) => {
                self.counters.record_dropped();
                tracing::warn!(codec = codec, "Unsupported video codec, dropping message");
                return None;
            }
            Err(e) => {
                self.counters.record_dropped();
                tracing::debug!(error = %e, size = msg.payload.len(), "Dropping video message");
                return None;
            }
        };

        match tag.packet_type {
            AvcPacketType::SequenceHeader => {
                self.counters.record_sequence_header();
                tracing::debug!(size = tag.data.len(), "AVC sequence header");
                Some(MediaEvent::SequenceHeader {
                    timestamp: msg.timestamp,
                    record: tag.data,
                })
            }
            AvcPacketType::Nalu => {
                if tag.frame_type.is_keyframe() {
                    self.counters.record_keyframe();
                } else {
                    self.counters.record_inter_frame();
                }
                tracing::trace!(
                    frame_type = tag.frame_type.value(),
                    composition_time = tag.composition_time,
                    size = tag.data.len(),
                    "AVC NALU"
                );
                Some(MediaEvent::Frame(VideoFrame {
                    timestamp: msg.timestamp,
                    frame_type: tag.frame_type,
                    composition_time: tag.composition_time,
                    data: tag.data,
                }))
            }
            AvcPacketType::EndOfSequence => {
                tracing::debug!("AVC end of sequence");
                Some(MediaEvent::EndOfSequence {
                    timestamp: msg.timestamp,
                })
            }
        }
    }
}

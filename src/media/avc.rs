//! AVC video tag parsing
//!
//! AVC Video Packet Structure:
//! ```text
//! +----------+----------+-----------------+-----------------+------
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+-----------------+------
//! ```
//!
//! AVCPacketType:
//! - 0: AVC sequence header (AVCDecoderConfigurationRecord)
//! - 1: AVC NALU (one or more length-prefixed NALUs)
//! - 2: AVC end of sequence

use bytes::Bytes;

use crate::error::{MediaError, Result};
use crate::media::flv::{codec_id, VideoFrameType, CODEC_AVC};

/// Bytes before the codec payload: tag byte, packet type, composition time
pub const AVC_HEADER_SIZE: usize = 5;

/// Shortest NALU packet that still carries elementary stream data
pub const MIN_NALU_PACKET_SIZE: usize = 9;

/// AVC packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// Parsed AVC video message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTag {
    pub frame_type: VideoFrameType,
    pub codec_id: u8,
    pub packet_type: AvcPacketType,
    /// Composition time offset in milliseconds (signed)
    pub composition_time: i32,
    /// Payload after the 5-byte header: the decoder configuration record for
    /// sequence headers, length-prefixed NAL units for NALU packets
    pub data: Bytes,
}

impl VideoTag {
    /// Parse an RTMP video message payload
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let Some(&first) = payload.first() else {
            return Err(MediaError::EmptyVideoTag.into());
        };

        let frame_type = VideoFrameType::from_byte(first);
        let codec_id = codec_id(first);
        if codec_id != CODEC_AVC {
            return Err(MediaError::UnsupportedCodec(codec_id).into());
        }

        if payload.len() < AVC_HEADER_SIZE {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let packet_type =
            AvcPacketType::from_byte(payload[1]).ok_or(MediaError::InvalidAvcPacket)?;

        // Composition time (signed 24-bit)
        let composition_time =
            ((payload[2] as i32) << 16) | ((payload[3] as i32) << 8) | (payload[4] as i32);
        let composition_time = if composition_time & 0x800000 != 0 {
            composition_time | !0xFFFFFF
        } else {
            composition_time
        };

        if packet_type == AvcPacketType::Nalu && payload.len() < MIN_NALU_PACKET_SIZE {
            return Err(MediaError::TruncatedNalu(payload.len()).into());
        }

        Ok(VideoTag {
            frame_type,
            codec_id,
            packet_type,
            composition_time,
            data: payload.slice(AVC_HEADER_SIZE..),
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == AvcPacketType::SequenceHeader
    }
}

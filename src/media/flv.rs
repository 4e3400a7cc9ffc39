//! FLV video tag header fields
//!
//! Each RTMP video message is an FLV video tag body without the tag header:
//!
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame,
    /// Any other frame type value, passed through unclassified
    Other(u8),
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 4) & 0x0F {
            1 => VideoFrameType::Keyframe,
            2 => VideoFrameType::InterFrame,
            other => VideoFrameType::Other(other),
        }
    }

    /// Raw 4-bit value
    pub fn value(&self) -> u8 {
        match self {
            VideoFrameType::Keyframe => 1,
            VideoFrameType::InterFrame => 2,
            VideoFrameType::Other(v) => *v,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, VideoFrameType::Keyframe)
    }
}

/// Video codec ID (lower 4 bits of first byte)
pub fn codec_id(b: u8) -> u8 {
    b & 0x0F
}

/// AVC (H.264)
pub const CODEC_AVC: u8 = 7;

//! Reassembled RTMP messages
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Audio/Video Messages (types 8, 9): Media data
//! - Data Messages (types 15, 18): Metadata
//! - Everything else (commands, shared objects, aggregates): not handled here
//!
//! Reference: RTMP Specification Section 5.4

use bytes::Bytes;

use crate::protocol::constants::*;

/// A fully reassembled application-layer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Chunk stream the message arrived on
    pub csid: u32,
    /// Absolute timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub type_id: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload, exactly `message_length` bytes
    pub payload: Bytes,
}

/// Routing class of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Control,
    Audio,
    Video,
    Metadata,
    Other(u8),
}

impl MessageKind {
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            MSG_SET_CHUNK_SIZE
            | MSG_ABORT
            | MSG_ACKNOWLEDGEMENT
            | MSG_USER_CONTROL
            | MSG_WINDOW_ACK_SIZE
            | MSG_SET_PEER_BANDWIDTH => MessageKind::Control,
            MSG_AUDIO => MessageKind::Audio,
            MSG_VIDEO => MessageKind::Video,
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => MessageKind::Metadata,
            other => MessageKind::Other(other),
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        MessageKind::from_type_id(self.type_id)
    }

    /// Chunk size announced by a Set Chunk Size message
    ///
    /// The top bit is reserved and must be zero, so it is masked off.
    pub fn set_chunk_size(&self) -> Option<u32> {
        if self.type_id != MSG_SET_CHUNK_SIZE || self.payload.len() < 4 {
            return None;
        }
        let p = &self.payload;
        Some(u32::from_be_bytes([p[0], p[1], p[2], p[3]]) & 0x7FFF_FFFF)
    }

    /// Chunk stream id named by an Abort message
    pub fn abort_csid(&self) -> Option<u32> {
        if self.type_id != MSG_ABORT || self.payload.len() < 4 {
            return None;
        }
        let p = &self.payload;
        Some(u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
    }
}

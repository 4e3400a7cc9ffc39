//! RTMP chunk stream decoder
//!
//! RTMP messages travel as chunks. Each chunk has a header that identifies the
//! chunk stream and, depending on its format, some or all of the message
//! header fields.
//!
//! ```text
//! Chunk Format:
//! +-------------+-----------------+-------------------+
//! | Basic Header| Message Header  | Chunk Data        |
//! | (1 byte)    | (0,3,7,11 bytes)| (variable)        |
//! +-------------+-----------------+-------------------+
//!
//! Basic Header: fmt(2) + csid(6), csid 2-63.
//! csid 0 and 1 select the 2- and 3-byte encodings, which are not supported.
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when the timestamp field is 0xFFFFFF
//! ```
//!
//! All multi-byte header fields are read big-endian, the message stream id
//! included.
//!
//! Two payload layouts are supported, see [`ChunkingMode`].

use bytes::{Buf, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::message::Message;

/// How message payloads are laid out after a chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkingMode {
    /// The whole declared message length follows a single header.
    ///
    /// Works with encoders that announce a chunk size larger than any message
    /// they send.
    #[default]
    Contiguous,
    /// Payloads are split at the negotiated chunk size and continued with
    /// type 3 chunks.
    Negotiated,
}

/// Timestamp resolution for a type 3 header that starts a new message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fmt3Timestamp {
    /// Reuse the previous absolute timestamp as is
    #[default]
    Unchanged,
    /// Add the previous timestamp delta again
    ApplyDelta,
}

/// Decoder options
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub chunking: ChunkingMode,
    pub fmt3_timestamp: Fmt3Timestamp,
    /// Messages declaring a larger length are rejected
    pub max_message_size: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingMode::default(),
            fmt3_timestamp: Fmt3Timestamp::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Last fully resolved header on a chunk stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeader {
    pub csid: u32,
    /// Format of the chunk that produced this header
    pub fmt: u8,
    /// Absolute timestamp (milliseconds)
    pub timestamp: u32,
    /// Last timestamp delta (the absolute timestamp for type 0)
    pub timestamp_delta: u32,
    pub message_length: u32,
    pub message_type: u8,
    pub stream_id: u32,
}

/// Per-chunk-stream state
#[derive(Debug, Default)]
struct ChunkStreamState {
    header: ChunkHeader,
    /// Whether the last header carried an extended timestamp
    has_extended_timestamp: bool,
    /// Payload collected so far (negotiated mode only)
    partial_message: BytesMut,
}

enum Step {
    Message(Message),
    Partial,
    NeedMore,
}

/// Chunk stream decoder
///
/// Buffer-driven: [`ChunkDecoder::decode`] consumes whole chunks from the front
/// of the buffer and leaves incomplete ones untouched.
pub struct ChunkDecoder {
    config: DecoderConfig,
    /// Maximum incoming chunk size (negotiated mode)
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    /// Bytes needed to finish the chunk at the head of the buffer
    needed: usize,
}

impl ChunkDecoder {
    /// Create a new decoder with default options
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            config,
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            needed: 0,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Cached header for a chunk stream
    pub fn last_header(&self, csid: u32) -> Option<&ChunkHeader> {
        self.streams.get(&csid).map(|s| &s.header)
    }

    /// Total bytes the head chunk needs, as of the last `Ok(None)` from decode
    pub fn pending_len(&self) -> usize {
        self.needed
    }

    /// Drop a partially received message (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.partial_message.clear();
        }
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Returns Ok(Some(message)) if a complete message was decoded,
    /// Ok(None) if more data is needed, or Err on a framing error. A framing
    /// error consumes the offending header so the caller can keep reading.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            match self.decode_chunk(buf)? {
                Step::Message(msg) => return Ok(Some(msg)),
                Step::Partial => continue,
                Step::NeedMore => return Ok(None),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<Step> {
        self.needed = 0;

        let Some(&first) = buf.first() else {
            return Ok(Step::NeedMore);
        };
        let fmt = (first >> 6) & 0x03;
        let csid_low = first & 0x3F;

        if csid_low < 2 {
            buf.advance(1);
            return Err(ProtocolError::UnsupportedChunkStreamId(csid_low).into());
        }
        let csid = csid_low as u32;

        let header_len = 1 + message_header_size(fmt);
        if buf.len() < header_len {
            self.needed = header_len;
            return Ok(Step::NeedMore);
        }

        let prior = self
            .streams
            .get(&csid)
            .map(|s| (s.header, s.has_extended_timestamp, s.partial_message.len()));

        let (prev, prev_extended, partial_len) = match (fmt, prior) {
            (CHUNK_FMT_0, None) => (ChunkHeader::default(), false, 0),
            (_, Some(p)) => p,
            (_, None) => {
                buf.advance(header_len);
                return Err(ProtocolError::MissingChunkHeader { csid, fmt }.into());
            }
        };

        let h = &buf[1..header_len];
        let timestamp_field = if fmt == CHUNK_FMT_3 { 0 } else { read_u24(&h[0..3]) };
        let extended = if fmt == CHUNK_FMT_3 {
            prev_extended
        } else {
            timestamp_field >= EXTENDED_TIMESTAMP_THRESHOLD
        };
        let ext_len = if extended { 4 } else { 0 };

        if buf.len() < header_len + ext_len {
            self.needed = header_len + ext_len;
            return Ok(Step::NeedMore);
        }

        let timestamp_value = if extended {
            let e = &buf[header_len..header_len + 4];
            u32::from_be_bytes([e[0], e[1], e[2], e[3]])
        } else {
            timestamp_field
        };

        let continuing = fmt == CHUNK_FMT_3 && partial_len > 0;
        let header = match fmt {
            CHUNK_FMT_0 => ChunkHeader {
                csid,
                fmt,
                timestamp: timestamp_value,
                timestamp_delta: timestamp_value,
                message_length: read_u24(&h[3..6]),
                message_type: h[6],
                stream_id: u32::from_be_bytes([h[7], h[8], h[9], h[10]]),
            },
            CHUNK_FMT_1 => ChunkHeader {
                csid,
                fmt,
                timestamp: prev.timestamp.wrapping_add(timestamp_value),
                timestamp_delta: timestamp_value,
                message_length: read_u24(&h[3..6]),
                message_type: h[6],
                stream_id: prev.stream_id,
            },
            CHUNK_FMT_2 => ChunkHeader {
                fmt,
                timestamp: prev.timestamp.wrapping_add(timestamp_value),
                timestamp_delta: timestamp_value,
                ..prev
            },
            _ => {
                let timestamp = match self.config.fmt3_timestamp {
                    _ if continuing => prev.timestamp,
                    Fmt3Timestamp::Unchanged => prev.timestamp,
                    Fmt3Timestamp::ApplyDelta => prev.timestamp.wrapping_add(prev.timestamp_delta),
                };
                ChunkHeader {
                    fmt,
                    timestamp,
                    ..prev
                }
            }
        };

        if header.message_length > self.config.max_message_size {
            buf.advance(header_len + ext_len);
            return Err(ProtocolError::MessageTooLarge {
                size: header.message_length,
                max: self.config.max_message_size,
            }
            .into());
        }

        let message_length = header.message_length as usize;
        let chunk_data_len = match self.config.chunking {
            ChunkingMode::Contiguous => message_length,
            ChunkingMode::Negotiated => {
                let collected = if continuing { partial_len } else { 0 };
                (message_length - collected.min(message_length)).min(self.chunk_size as usize)
            }
        };

        let total = header_len + ext_len + chunk_data_len;
        if buf.len() < total {
            self.needed = total;
            return Ok(Step::NeedMore);
        }

        // The whole chunk is buffered: commit
        buf.advance(header_len + ext_len);
        let data = buf.split_to(chunk_data_len);

        let state = self.streams.entry(csid).or_default();
        state.header = header;
        state.has_extended_timestamp = extended;

        if !continuing && !state.partial_message.is_empty() {
            tracing::debug!(
                csid = csid,
                dropped = state.partial_message.len(),
                "New message header before previous message completed"
            );
            state.partial_message.clear();
        }

        let payload = if state.partial_message.is_empty() && data.len() == message_length {
            data.freeze()
        } else {
            state.partial_message.extend_from_slice(&data);
            if state.partial_message.len() < message_length {
                return Ok(Step::Partial);
            }
            state.partial_message.split().freeze()
        };

        tracing::trace!(
            csid = csid,
            fmt = fmt,
            message_type = header.message_type,
            length = message_length,
            timestamp = header.timestamp,
            "Decoded message"
        );

        Ok(Step::Message(Message {
            csid,
            timestamp: header.timestamp,
            type_id: header.message_type,
            stream_id: header.stream_id,
            payload,
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Message header size for a chunk format
fn message_header_size(fmt: u8) -> usize {
    match fmt {
        CHUNK_FMT_0 => 11,
        CHUNK_FMT_1 => 7,
        CHUNK_FMT_2 => 3,
        _ => 0,
    }
}

/// Read 24-bit big-endian value
fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::BufMut;

    fn put_u24(buf: &mut BytesMut, value: u32) {
        buf.put_u8(((value >> 16) & 0xFF) as u8);
        buf.put_u8(((value >> 8) & 0xFF) as u8);
        buf.put_u8((value & 0xFF) as u8);
    }

    /// Type 0 chunk carrying the whole payload
    pub(crate) fn fmt0(csid: u8, timestamp: u32, type_id: u8, stream_id: u32, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(csid);
        put_u24(&mut buf, timestamp);
        put_u24(&mut buf, payload.len() as u32);
        buf.put_u8(type_id);
        buf.put_u32(stream_id);
        buf.put_slice(payload);
        buf
    }

    fn fmt1(csid: u8, delta: u32, type_id: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8((CHUNK_FMT_1 << 6) | csid);
        put_u24(&mut buf, delta);
        put_u24(&mut buf, payload.len() as u32);
        buf.put_u8(type_id);
        buf.put_slice(payload);
        buf
    }

    fn fmt2(csid: u8, delta: u32, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8((CHUNK_FMT_2 << 6) | csid);
        put_u24(&mut buf, delta);
        buf.put_slice(payload);
        buf
    }

    fn fmt3(csid: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8((CHUNK_FMT_3 << 6) | csid);
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn test_full_header() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = fmt0(6, 1000, MSG_VIDEO, 1, b"video data");

        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.csid, 6);
        assert_eq!(msg.timestamp, 1000);
        assert_eq!(msg.type_id, MSG_VIDEO);
        assert_eq!(msg.stream_id, 1);
        assert_eq!(&msg.payload[..], b"video data");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fmt3_inherits_fmt0_fields() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = fmt0(4, 500, MSG_AUDIO, 7, b"abcd");
        buf.unsplit(fmt3(4, b"efgh"));

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(second.payload.len(), first.payload.len());
        assert_eq!(second.type_id, MSG_AUDIO);
        assert_eq!(second.stream_id, 7);
        assert_eq!(second.timestamp, 500);
        assert_eq!(&second.payload[..], b"efgh");

        let cached = decoder.last_header(4).unwrap();
        assert_eq!(cached.message_length, 4);
        assert_eq!(cached.fmt, CHUNK_FMT_3);
    }

    #[test]
    fn test_fmt3_apply_delta_policy() {
        let mut decoder = ChunkDecoder::with_config(DecoderConfig {
            fmt3_timestamp: Fmt3Timestamp::ApplyDelta,
            ..Default::default()
        });
        let mut buf = fmt0(6, 1000, MSG_VIDEO, 1, b"a");
        buf.unsplit(fmt1(6, 40, MSG_VIDEO, b"b"));
        buf.unsplit(fmt3(6, b"c"));

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().timestamp, 1000);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().timestamp, 1040);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().timestamp, 1080);
    }

    #[test]
    fn test_fmt1_and_fmt2_resolution() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = fmt0(6, 100, MSG_VIDEO, 3, b"xx");
        buf.unsplit(fmt1(6, 33, MSG_AUDIO, b"yyy"));
        buf.unsplit(fmt2(6, 10, b"zzz"));

        decoder.decode(&mut buf).unwrap().unwrap();

        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, 133);
        assert_eq!(msg.type_id, MSG_AUDIO);
        assert_eq!(msg.stream_id, 3);
        assert_eq!(msg.payload.len(), 3);

        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, 143);
        assert_eq!(msg.type_id, MSG_AUDIO);
        assert_eq!(&msg.payload[..], b"zzz");
    }

    #[test]
    fn test_continuation_without_prior_header() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = fmt3(5, b"");
        buf.unsplit(fmt0(5, 0, MSG_VIDEO, 1, b"ok"));

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::MissingChunkHeader { csid: 5, fmt: 3 })
        ));

        // The offending header was consumed; the next chunk still decodes
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&msg.payload[..], b"ok");
    }

    #[test]
    fn test_fmt1_without_prior_header() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = fmt1(9, 10, MSG_VIDEO, b"data");

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::MissingChunkHeader { csid: 9, fmt: 1 })
        ));
        assert!(decoder.last_header(9).is_none());
    }

    #[test]
    fn test_extended_csid_unsupported() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::from(&[0x00u8, 0x10][..]);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::UnsupportedChunkStreamId(0))
        ));
        assert_eq!(buf.len(), 1);

        let mut buf = BytesMut::from(&[0x41u8][..]);
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn test_incomplete_chunk_left_in_buffer() {
        let mut decoder = ChunkDecoder::new();
        let full = fmt0(6, 0, MSG_VIDEO, 1, &[7u8; 20]);

        let mut buf = BytesMut::from(&full[..15]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 15);
        assert_eq!(decoder.pending_len(), full.len());
        assert!(decoder.last_header(6).is_none());

        buf.extend_from_slice(&full[15..]);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 20);
    }

    #[test]
    fn test_extended_timestamp() {
        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(6);
        put_u24(&mut buf, EXTENDED_TIMESTAMP_THRESHOLD);
        put_u24(&mut buf, 2);
        buf.put_u8(MSG_VIDEO);
        buf.put_u32(1);
        buf.put_u32(0x0100_0000);
        buf.put_slice(b"hi");

        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.timestamp, 0x0100_0000);
        assert_eq!(&msg.payload[..], b"hi");
    }

    #[test]
    fn test_message_too_large() {
        let mut decoder = ChunkDecoder::with_config(DecoderConfig {
            max_message_size: 8,
            ..Default::default()
        });
        let mut buf = fmt0(6, 0, MSG_VIDEO, 1, &[0u8; 16]);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::MessageTooLarge { size: 16, max: 8 })
        ));
    }

    #[test]
    fn test_negotiated_chunking_reassembly() {
        let mut decoder = ChunkDecoder::with_config(DecoderConfig {
            chunking: ChunkingMode::Negotiated,
            ..Default::default()
        });

        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let first = fmt0(6, 0, MSG_VIDEO, 1, &payload);
        // Keep the 12-byte header plus the first 128 payload bytes
        let mut buf = BytesMut::from(&first[..12 + 128]);
        buf.unsplit(fmt3(6, &payload[128..256]));
        buf.unsplit(fmt3(6, &payload[256..]));

        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&msg.payload[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_negotiated_chunk_size_change() {
        let mut decoder = ChunkDecoder::with_config(DecoderConfig {
            chunking: ChunkingMode::Negotiated,
            ..Default::default()
        });
        decoder.set_chunk_size(4096);
        assert_eq!(decoder.chunk_size(), 4096);

        let payload = vec![1u8; 1000];
        let mut buf = fmt0(6, 0, MSG_VIDEO, 1, &payload);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 1000);
    }

    #[test]
    fn test_negotiated_abort() {
        let mut decoder = ChunkDecoder::with_config(DecoderConfig {
            chunking: ChunkingMode::Negotiated,
            ..Default::default()
        });

        let full = fmt0(6, 0, MSG_VIDEO, 1, &[2u8; 200]);
        let mut buf = BytesMut::from(&full[..12 + 128]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        decoder.abort(6);

        // A fresh type 3 now starts a new 200-byte message
        let mut buf = fmt3(6, &[3u8; 128]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        let mut buf = fmt3(6, &[3u8; 72]);
        let msg = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(msg.payload.iter().all(|&b| b == 3));
    }
}

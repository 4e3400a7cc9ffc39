//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange)
//! - Chunk stream demultiplexing and message reassembly
//! - Message types

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkHeader, ChunkingMode, DecoderConfig, Fmt3Timestamp};
pub use message::{Message, MessageKind};

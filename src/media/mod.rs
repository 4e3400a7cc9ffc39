//! Media handling for RTMP ingest
//!
//! This module provides:
//! - FLV video tag header fields
//! - AVC video tag parsing
//! - Message demultiplexing into media events
//! - Frame sinks and the external decode stage interface

pub mod avc;
pub mod demux;
pub mod flv;
pub mod sink;

pub use avc::{AvcPacketType, VideoTag};
pub use demux::Demuxer;
pub use flv::VideoFrameType;
pub use sink::{sink_fn, DecodeStage, DecoderSink, FnSink, FrameSink, MediaEvent, VideoFrame};

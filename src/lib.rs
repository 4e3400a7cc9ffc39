//! rtmp-ingest: RTMP client for ingesting live H.264 video
//!
//! This library connects to an RTMP server and turns the stream into
//! elementary video frames:
//! - Simple RTMP handshake
//! - Chunk stream decoding and message reassembly
//! - FLV/AVC video tag parsing
//! - Frame delivery to a sink or an external decode stage
//! - Connection supervision with bounded reconnect
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_ingest::{ClientConfig, FrameProcessor, IngestClient, MediaEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(IngestClient::new(ClientConfig::new("rtmp://localhost/live/test"))?);
//!     client.connect().await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//!     let mut processor = FrameProcessor::new();
//!     processor.start_processing(client.clone(), tx);
//!
//!     while let Some(event) = rx.recv().await {
//!         if let MediaEvent::Frame(frame) = event {
//!             println!("{:?} frame, {} bytes", frame.frame_type, frame.data.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use client::config::{ClientConfig, StreamTarget};
pub use client::processor::FrameProcessor;
pub use client::supervisor::{ConnectionState, IngestClient};
pub use error::{Error, Result};
pub use media::sink::{sink_fn, DecodeStage, DecoderSink, FrameSink, MediaEvent, VideoFrame};
pub use media::flv::VideoFrameType;
pub use protocol::message::Message;
pub use stats::IngestStats;

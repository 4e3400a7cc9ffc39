//! RTMP ingest client
//!
//! Provides the client side of an ingest session:
//! - Stream URL parsing and client configuration
//! - Connection establishment and message reading
//! - Connection supervision with reconnect
//! - The frame processing worker

pub mod config;
pub mod connector;
pub mod processor;
pub mod supervisor;

pub use config::{ClientConfig, StreamTarget};
pub use connector::Connection;
pub use processor::FrameProcessor;
pub use supervisor::{ConnectionState, IngestClient};

//! Statistics and metrics
//!
//! Provides observability into an ingest session.

pub mod metrics;

pub use metrics::{IngestCounters, IngestStats};

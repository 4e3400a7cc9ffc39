//! RTMP ingest example
//!
//! Run with: cargo run --example ingest -- rtmp://localhost/live/test_key
//!
//! Connects to an RTMP server, pulls H.264 video and prints frame info until
//! Ctrl-C or until the connection cannot be re-established.

use std::sync::Arc;

use rtmp_ingest::{ClientConfig, FrameProcessor, IngestClient, MediaEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_ingest=info".parse()?)
                .add_directive("ingest=info".parse()?),
        )
        .init();

    // Get URL from command line
    let url = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: ingest <rtmp_url>");
        eprintln!("Example: ingest rtmp://localhost/live/test_key");
        std::process::exit(1);
    });

    println!("Connecting to {}", url);

    let client = Arc::new(IngestClient::new(ClientConfig::new(&url))?);
    client.connect().await?;
    println!("Connected!");

    let (tx, mut events) = mpsc::channel(256);
    let mut processor = FrameProcessor::new();
    processor.start_processing(client.clone(), tx);

    let event_handle = tokio::spawn(async move {
        let mut frames = 0u64;
        while let Some(event) = events.recv().await {
            match event {
                MediaEvent::SequenceHeader { timestamp, record } => {
                    println!("Sequence header at {} ({} bytes)", timestamp, record.len());
                }
                MediaEvent::Frame(frame) => {
                    frames += 1;
                    if frame.frame_type.is_keyframe() {
                        println!("  Keyframe at {}", frame.timestamp);
                    }
                    if frames % 100 == 0 {
                        println!("Progress: {} frames", frames);
                    }
                }
                MediaEvent::Metadata { payload, .. } => {
                    println!("Metadata received ({} bytes)", payload.len());
                }
                MediaEvent::EndOfSequence { timestamp } => {
                    println!("End of sequence at {}", timestamp);
                }
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Stopping");
            processor.stop_processing();
        }
        _ = event_handle => {}
    }

    processor.join().await;
    client.disconnect();

    let stats = processor.stats();
    println!(
        "Final stats: {} messages, {} keyframes, {} inter frames, {} dropped, {} reconnects",
        stats.messages, stats.keyframes, stats.inter_frames, stats.dropped_messages, stats.reconnects
    );

    Ok(())
}

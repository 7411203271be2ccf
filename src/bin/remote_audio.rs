//! Remote Audio
//!
//! Opens the configured input and output devices and runs the full
//! capture → encode → decode → render chain. Without a network transport
//! the egress queue is echoed straight back into ingress.
//!
//! Usage: `remote-audio [config.toml]` or `remote-audio --list-devices`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_audio::{
    audio::{buffer::FrameTopic, device::list_devices},
    config::AppConfig,
    events::{watch_system_events, Event, EventBus, ShutdownScope, Topic},
    params::{Direction, PipelineParameters},
    pipeline::AudioPipeline,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--list-devices") {
        println!("{}", serde_json::to_string_pretty(&list_devices())?);
        return Ok(());
    }

    let config_path = arg.map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    let params = match PipelineParameters::from_config(&config) {
        Ok(params) => Arc::new(params),
        Err(e) => {
            tracing::error!("{}", e);
            anyhow::bail!("refusing to start with invalid audio parameters");
        }
    };

    tracing::info!(
        "Starting remote audio: {:?} codec, wire {} Hz {:?} {} bit, frame {} samples",
        params.codec_kind(),
        params.wire_rate(),
        params.wire_channels(),
        params.bit_depth(),
        params.frame_length
    );

    let bus = EventBus::new();
    let events = bus.subscribe(&[Topic::Shutdown, Topic::StreamActive]);
    let watcher_bus = bus.clone();
    tokio::spawn(async move {
        if let Err(e) = watch_system_events(watcher_bus).await {
            tracing::error!("Interrupt handler failed: {}", e);
        }
    });

    let pipeline = AudioPipeline::new(params, bus.clone());
    pipeline.start().context("starting audio pipeline")?;

    let egress = pipeline.egress();
    let mut last_stats_time = Instant::now();

    tracing::info!("Running in local echo mode - press Ctrl+C to stop");

    'main: loop {
        while let Some(event) = events.try_recv() {
            match event {
                Event::Shutdown(ShutdownScope::All) => break 'main,
                Event::Shutdown(ShutdownScope::Direction(direction)) => {
                    tracing::warn!("{} direction shut down", direction);
                }
                Event::StreamActive { direction, active } => {
                    tracing::info!("{} stream active: {}", direction, active);
                }
                _ => {}
            }
        }

        if !pipeline.is_active(Direction::Input) && !pipeline.is_active(Direction::Output) {
            tracing::warn!("Both directions stopped");
            break;
        }

        while let Some(mut msg) = egress.try_pop() {
            msg.topic = FrameTopic::Received;
            pipeline.receive(msg);
        }

        if last_stats_time.elapsed() >= STATS_INTERVAL {
            last_stats_time = Instant::now();
            let stats = pipeline.stats();
            tracing::info!(
                "Capture: {} frames, {} dropped, {} encoded, {} failed | Render: {} decoded, {} concealed, {} rendered, {} overwritten, {} silence",
                stats.frames_captured,
                stats.capture_dropped,
                stats.frames_encoded,
                stats.encode_errors + stats.conversion_errors,
                stats.frames_decoded,
                stats.frames_concealed,
                stats.frames_rendered,
                stats.ingress_overwritten + stats.render_overwritten,
                stats.silence_inserted
            );
        }

        tokio::time::sleep(Duration::from_micros(500)).await;
    }

    pipeline.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

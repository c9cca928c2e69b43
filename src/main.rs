use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use replaycore::core::{Frame, StreamProfile};
use replaycore::{MemoryReader, PlaybackConfig, PlaybackDevice, PlaybackStatus};

/// Replay a JSON recording and print every delivered frame
#[derive(Parser, Debug)]
#[command(name = "replaycore", version)]
struct Args {
    /// Recording document to play
    recording: PathBuf,

    /// Optional playback config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Playback speed multiplier
    #[arg(long)]
    rate: Option<f64>,

    /// Deliver as fast as possible instead of at recorded pace
    #[arg(long)]
    no_real_time: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PlaybackConfig::load(path)?,
        None => PlaybackConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.frame_rate = rate;
    }
    if args.no_real_time {
        config.real_time = false;
    }

    let reader = MemoryReader::open(&args.recording)?;
    let device = PlaybackDevice::new(Box::new(reader), config).context("Failed to open playback device")?;
    println!(
        "Playing {} ({:?}, {} sensors)",
        device.get_file_name(),
        device.get_duration(),
        device.get_sensors_count()
    );

    // hold playback until every sensor is streaming
    device.pause()?;
    let mut status = device.subscribe_status();
    for sensor in device.sensors() {
        let requests: Vec<StreamProfile> = sensor
            .get_stream_profiles()
            .iter()
            .map(|profile| (**profile).clone())
            .collect();
        if requests.is_empty() {
            continue;
        }
        sensor.open(&requests)?;
        sensor.start(Arc::new(|frame: Frame| {
            let stream = frame
                .profile()
                .map(|profile| profile.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "[{:>10.3} ms] {} #{} ({} bytes)",
                frame.timestamp.as_secs_f64() * 1000.0,
                stream,
                frame.frame_number,
                frame.data.len()
            );
        }))?;
    }

    device.resume()?;
    if device.get_current_status() != PlaybackStatus::Stopped {
        loop {
            match status.blocking_recv() {
                Ok(PlaybackStatus::Stopped) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
            }
        }
    }

    for sensor in device.sensors() {
        sensor.close()?;
    }
    println!("Playback complete");
    Ok(())
}

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

use replaycore::core::{Format, Frame, StreamIdentifier, StreamProfile, StreamType};
use replaycore::snapshot::{
    CameraInfo, DeviceSnapshot, ExtensionSnapshot, Extensions, InfoSnapshot, OptionId, OptionRange,
    OptionsSnapshot, SensorSnapshot,
};
use replaycore::{PlaybackConfig, PlaybackDevice, PlaybackStatus, Recording};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

pub fn depth_stream() -> StreamIdentifier {
    StreamIdentifier::new(0, StreamType::Depth, 0)
}

pub fn color_stream() -> StreamIdentifier {
    StreamIdentifier::new(1, StreamType::Color, 0)
}

/// Stereo module (depth) plus RGB module (color)
pub fn device_snapshot() -> DeviceSnapshot {
    let options = OptionsSnapshot::default().with(
        OptionId::Exposure,
        8500.0,
        OptionRange {
            min: 1.0,
            max: 165_000.0,
            step: 1.0,
            default: 8500.0,
        },
    );
    DeviceSnapshot {
        device_extensions: Extensions::new().with(ExtensionSnapshot::Info(
            InfoSnapshot::default()
                .with(CameraInfo::Name, "Recorded Camera")
                .with(CameraInfo::SerialNumber, "0001"),
        )),
        sensors: vec![
            SensorSnapshot::new(
                Extensions::new().with(ExtensionSnapshot::Options(options)),
                vec![StreamProfile::new(StreamType::Depth, 0, Format::Z16, 30).with_resolution(640, 480)],
            ),
            SensorSnapshot::new(
                Extensions::new(),
                vec![StreamProfile::new(StreamType::Color, 0, Format::Rgb8, 30).with_resolution(640, 480)],
            ),
        ],
        ..Default::default()
    }
}

/// A: depth at 0, 10, 20 ms. B: color at 5, 15 ms.
pub fn two_stream_recording() -> Recording {
    Recording::new("two_streams", device_snapshot())
        .with_frame(ms(0), depth_stream(), 0)
        .with_frame(ms(5), color_stream(), 0)
        .with_frame(ms(10), depth_stream(), 1)
        .with_frame(ms(15), color_stream(), 1)
        .with_frame(ms(20), depth_stream(), 2)
}

/// Depth frames at `0, step, 2 * step, ...`
pub fn depth_recording(count: u64, step: Duration) -> Recording {
    (0..count).fold(Recording::new("depth_only", device_snapshot()), |recording, n| {
        recording.with_frame(step * n as u32, depth_stream(), n)
    })
}

pub fn config(real_time: bool) -> PlaybackConfig {
    PlaybackConfig {
        real_time,
        ..PlaybackConfig::default()
    }
}

/// (sensor index, timestamp in ms) per delivered frame
pub type Deliveries = Receiver<(u32, u64)>;

/// Open and start every sensor with a collecting callback
pub fn open_and_start_all(device: &PlaybackDevice) -> Deliveries {
    let (tx, rx) = unbounded();
    for sensor in device.sensors() {
        let requests: Vec<StreamProfile> = sensor
            .get_stream_profiles()
            .iter()
            .map(|profile| (**profile).clone())
            .collect();
        sensor.open(&requests).unwrap();

        let tx = tx.clone();
        sensor
            .start(Arc::new(move |frame: Frame| {
                let sensor = frame.sensor_index().unwrap_or(u32::MAX);
                let _ = tx.send((sensor, frame.timestamp.as_millis() as u64));
            }))
            .unwrap();
    }
    rx
}

/// Start every already-open sensor again with a fresh collecting callback
pub fn restart_all(device: &PlaybackDevice) -> Deliveries {
    let (tx, rx) = unbounded();
    for sensor in device.sensors() {
        let tx = tx.clone();
        sensor
            .start(Arc::new(move |frame: Frame| {
                let sensor = frame.sensor_index().unwrap_or(u32::MAX);
                let _ = tx.send((sensor, frame.timestamp.as_millis() as u64));
            }))
            .unwrap();
    }
    rx
}

/// Start every sensor without letting playback run yet
pub fn start_paused(device: &PlaybackDevice) -> Deliveries {
    device.pause().unwrap();
    let rx = open_and_start_all(device);
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);
    rx
}

/// Collect status signals until `want` arrives
pub fn wait_for_status(rx: &mut broadcast::Receiver<PlaybackStatus>, want: PlaybackStatus) -> Vec<PlaybackStatus> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(status) => {
                seen.push(status);
                if status == want {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "timed out waiting for {want}, saw {seen:?}");
                thread::sleep(ms(1));
            }
            Err(err) => panic!("status channel failed: {err}"),
        }
    }
}

/// Status signals already sent
pub fn drain_statuses(rx: &mut broadcast::Receiver<PlaybackStatus>) -> Vec<PlaybackStatus> {
    let mut seen = Vec::new();
    while let Ok(status) = rx.try_recv() {
        seen.push(status);
    }
    seen
}

pub fn drain(rx: &Deliveries) -> Vec<(u32, u64)> {
    rx.try_iter().collect()
}

pub fn for_sensor(deliveries: &[(u32, u64)], sensor: u32) -> Vec<u64> {
    deliveries
        .iter()
        .filter(|(index, _)| *index == sensor)
        .map(|(_, ts)| *ts)
        .collect()
}

mod common;

use anyhow::anyhow;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use replaycore::core::{Frame, Notification, NotificationCategory, Severity, StreamIdentifier};
use replaycore::reader::SerializedData;
use replaycore::snapshot::{CameraInfo, DeviceSnapshot, OptionId};
use replaycore::{MemoryReader, PlaybackDevice, PlaybackError, PlaybackStatus, RecordingReader};

fn device(recording: replaycore::Recording, real_time: bool) -> PlaybackDevice {
    PlaybackDevice::new(Box::new(MemoryReader::new(recording)), config(real_time)).unwrap()
}

#[test]
fn test_two_streams_deliver_in_order_before_stop() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.resume().unwrap();
    let seen = wait_for_status(&mut status, PlaybackStatus::Stopped);
    assert_eq!(
        seen,
        vec![PlaybackStatus::Paused, PlaybackStatus::Playing, PlaybackStatus::Stopped]
    );

    let delivered = drain(&rx);
    assert_eq!(for_sensor(&delivered, 0), vec![0, 10, 20]);
    assert_eq!(for_sensor(&delivered, 1), vec![5, 15]);
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
}

#[test]
fn test_repeated_transitions_are_silent() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let _rx = start_paused(&device);
    assert_eq!(drain_statuses(&mut status), vec![PlaybackStatus::Paused]);

    device.start().unwrap();
    device.pause().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);
    assert!(drain_statuses(&mut status).is_empty());

    device.stop().unwrap();
    device.stop().unwrap();
    assert_eq!(drain_statuses(&mut status), vec![PlaybackStatus::Stopped]);
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
}

#[test]
fn test_transition_table() {
    let device = device(depth_recording(200, ms(10)), true);
    let mut status = device.subscribe_status();
    let sensor = device.get_sensor(0).unwrap();
    let depth = (*sensor.get_stream_profiles()[0]).clone();
    sensor.open(&[depth]).unwrap();

    // Stopped -> start -> Playing
    sensor.start(Arc::new(|_: Frame| {})).unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Playing);

    // Playing -> start -> Playing
    device.start().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Playing);

    // Playing -> pause -> Paused
    device.pause().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);

    // Paused -> start -> Paused
    device.start().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);

    // Paused -> seek -> Paused
    device.seek_to_time(ms(500)).unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);

    // Paused -> resume -> Playing
    device.resume().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Playing);

    // Playing -> seek / set_frame_rate -> Playing
    device.seek_to_time(ms(100)).unwrap();
    device.set_frame_rate(2.0).unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Playing);

    // Playing -> stop -> Stopped
    device.stop().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
    assert!(!sensor.is_streaming());

    assert_eq!(
        drain_statuses(&mut status),
        vec![
            PlaybackStatus::Playing,
            PlaybackStatus::Paused,
            PlaybackStatus::Playing,
            PlaybackStatus::Stopped,
        ]
    );
}

#[test]
fn test_paused_device_stops() {
    let device = device(depth_recording(50, ms(10)), true);
    let _rx = start_paused(&device);

    device.stop().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
    assert!(!device.is_paused());
}

#[test]
fn test_pause_before_start_enters_paused() {
    let device = device(two_stream_recording(), false);
    device.pause().unwrap();
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
    assert!(device.is_paused());

    let rx = open_and_start_all(&device);
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_end_of_file_stops_every_sensor_once() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);
    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    for sensor in device.sensors() {
        assert!(!sensor.is_streaming());
    }
    assert_eq!(drain(&rx).len(), 5);

    // nothing is streaming, so a device start has nothing to replay
    device.start().unwrap();
    thread::sleep(ms(20));
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);
    assert!(drain(&rx).is_empty());
    assert!(drain_statuses(&mut status).is_empty());
}

#[test]
fn test_paused_seek_redelivers_last_frame_per_stream() {
    let device = device(two_stream_recording(), false);
    let rx = start_paused(&device);

    device.seek_to_time(ms(15)).unwrap();
    let mut delivered = drain(&rx);
    delivered.sort_unstable();
    assert_eq!(delivered, vec![(0, 10), (1, 15)]);

    thread::sleep(ms(20));
    assert!(drain(&rx).is_empty());
    assert_eq!(device.get_position(), ms(15));
}

#[test]
fn test_resume_after_seek_continues_from_seek_point() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.seek_to_time(ms(12)).unwrap();
    let mut redelivered = drain(&rx);
    redelivered.sort_unstable();
    assert_eq!(redelivered, vec![(0, 10), (1, 5)]);

    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);
    let delivered = drain(&rx);
    assert_eq!(for_sensor(&delivered, 0), vec![20]);
    assert_eq!(for_sensor(&delivered, 1), vec![15]);
}

#[test]
fn test_restart_after_stop_replays_from_beginning() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.seek_to_time(ms(15)).unwrap();
    drain(&rx);
    device.stop().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    device.pause().unwrap();
    let rx = restart_all(&device);
    assert_eq!(device.get_current_status(), PlaybackStatus::Paused);
    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    let delivered = drain(&rx);
    assert_eq!(for_sensor(&delivered, 0), vec![0, 10, 20]);
    assert_eq!(for_sensor(&delivered, 1), vec![5, 15]);
}

#[test]
fn test_blocking_call_from_reader_thread_fails_safe() {
    let notification = Notification::new(NotificationCategory::HardwareEvent, Severity::Info, "pause me");
    let recording = two_stream_recording().with_notification(ms(8), 0, notification);
    let device = Arc::new(device(recording, false));
    let mut status = device.subscribe_status();

    let (tx, results) = crossbeam_channel::unbounded();
    let weak = Arc::downgrade(&device);
    device
        .get_sensor(0)
        .unwrap()
        .register_notifications_callback(Arc::new(move |_: Notification| {
            if let Some(device) = weak.upgrade() {
                let _ = tx.send(device.pause());
            }
        }));

    let rx = start_paused(&device);
    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);
    assert_eq!(device.get_current_status(), PlaybackStatus::Stopped);

    let delivered = drain(&rx);
    if cfg!(debug_assertions) {
        // the assertion unwinds the iteration, which ends playback like end of file
        assert!(results.try_recv().is_err());
        assert_eq!(for_sensor(&delivered, 0), vec![0]);
        assert_eq!(for_sensor(&delivered, 1), vec![5]);
    } else {
        assert!(matches!(results.try_recv(), Ok(Err(PlaybackError::Deadlock(_)))));
        assert_eq!(delivered.len(), 5);
    }
}

#[test]
fn test_seek_past_end_is_rejected() {
    let device = device(two_stream_recording(), false);
    assert_eq!(device.get_duration(), ms(20));
    assert!(matches!(
        device.seek_to_time(ms(21)),
        Err(PlaybackError::InvalidValue(_))
    ));
    assert_eq!(device.get_position(), Duration::ZERO);
}

#[test]
fn test_zero_frame_rate_is_rejected() {
    let device = device(two_stream_recording(), true);
    assert!(matches!(device.set_frame_rate(0.0), Err(PlaybackError::InvalidValue(_))));
    assert!(matches!(device.set_frame_rate(-1.0), Err(PlaybackError::InvalidValue(_))));
    assert!(matches!(device.set_frame_rate(f64::NAN), Err(PlaybackError::InvalidValue(_))));
    assert_eq!(device.get_frame_rate(), 1.0);

    device.set_frame_rate(0.5).unwrap();
    assert_eq!(device.get_frame_rate(), 0.5);
}

#[test]
fn test_real_time_toggle() {
    let device = device(two_stream_recording(), true);
    assert!(device.is_real_time());
    device.set_real_time(false).unwrap();
    assert!(!device.is_real_time());
}

#[test]
fn test_pause_and_resume_deliver_every_frame_once() {
    let device = device(depth_recording(11, ms(10)), true);
    let mut status = device.subscribe_status();
    let rx = open_and_start_all(&device);

    thread::sleep(ms(35));
    device.pause().unwrap();
    let before = drain(&rx).len();
    thread::sleep(ms(30));
    assert!(drain(&rx).is_empty());

    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    let after = drain(&rx);
    let expected: Vec<u64> = (before as u64..11).map(|n| n * 10).collect();
    assert_eq!(for_sensor(&after, 0), expected);
}

#[test]
fn test_closed_stream_receives_nothing() {
    let device = device(two_stream_recording(), false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.get_sensor(1).unwrap().close().unwrap();
    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    let delivered = drain(&rx);
    assert_eq!(for_sensor(&delivered, 0), vec![0, 10, 20]);
    assert!(for_sensor(&delivered, 1).is_empty());
}

#[test]
fn test_option_changes_and_notifications_reach_sensor() {
    let notification = Notification::new(NotificationCategory::HardwareEvent, Severity::Info, "laser on");
    let recording = two_stream_recording()
        .with_option(ms(7), 0, OptionId::Exposure, 3300.0)
        .with_notification(ms(8), 0, notification);
    let device = device(recording, false);
    let mut status = device.subscribe_status();

    let sensor = device.get_sensor(0).unwrap();
    let (tx, notifications) = crossbeam_channel::unbounded();
    sensor.register_notifications_callback(Arc::new(move |n: Notification| {
        let _ = tx.send(n.description);
    }));
    assert_eq!(sensor.get_option(OptionId::Exposure), Some(8500.0));

    let _rx = start_paused(&device);
    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    assert_eq!(sensor.get_option(OptionId::Exposure), Some(3300.0));
    assert_eq!(notifications.try_recv().unwrap(), "laser on");
}

#[test]
fn test_seek_refreshes_recorded_options() {
    let recording = two_stream_recording().with_option(ms(7), 0, OptionId::Exposure, 3300.0);
    let device = device(recording, false);
    let sensor = device.get_sensor(0).unwrap();

    device.seek_to_time(ms(10)).unwrap();
    assert_eq!(sensor.get_option(OptionId::Exposure), Some(3300.0));
    device.seek_to_time(ms(5)).unwrap();
    assert_eq!(sensor.get_option(OptionId::Exposure), Some(8500.0));
}

#[test]
fn test_invalid_sample_is_skipped() {
    let recording = two_stream_recording().with_invalid(ms(12), "truncated chunk");
    let device = device(recording, false);
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);
    assert_eq!(drain(&rx).len(), 5);
}

/// Fails every read after the first `good` samples
struct FailingReader {
    inner: MemoryReader,
    good: usize,
    reads: usize,
}

impl RecordingReader for FailingReader {
    fn query_device_description(&mut self, at: Duration) -> anyhow::Result<DeviceSnapshot> {
        self.inner.query_device_description(at)
    }

    fn read_next_data(&mut self) -> anyhow::Result<SerializedData> {
        self.reads += 1;
        if self.reads > self.good {
            return Err(anyhow!("corrupt chunk at read {}", self.reads));
        }
        self.inner.read_next_data()
    }

    fn seek_to_time(&mut self, time: Duration) -> anyhow::Result<()> {
        self.inner.seek_to_time(time)
    }

    fn fetch_last_frames(&mut self, at: Duration) -> anyhow::Result<Vec<SerializedData>> {
        self.inner.fetch_last_frames(at)
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.inner.reset()
    }

    fn query_duration(&self) -> Duration {
        self.inner.query_duration()
    }

    fn enable_stream(&mut self, filters: &[StreamIdentifier]) -> anyhow::Result<()> {
        self.inner.enable_stream(filters)
    }

    fn disable_stream(&mut self, filters: &[StreamIdentifier]) -> anyhow::Result<()> {
        self.inner.disable_stream(filters)
    }

    fn file_name(&self) -> &str {
        self.inner.file_name()
    }
}

#[test]
fn test_read_failure_ends_playback() {
    let reader = FailingReader {
        inner: MemoryReader::new(two_stream_recording()),
        good: 2,
        reads: 0,
    };
    let device = PlaybackDevice::new(Box::new(reader), config(false)).unwrap();
    let mut status = device.subscribe_status();
    let rx = start_paused(&device);

    device.resume().unwrap();
    wait_for_status(&mut status, PlaybackStatus::Stopped);

    let mut delivered = drain(&rx);
    delivered.sort_unstable();
    assert_eq!(delivered, vec![(0, 0), (1, 5)]);
}

#[test]
fn test_device_info() {
    let device = device(two_stream_recording(), false);
    assert_eq!(device.get_info(CameraInfo::Name), Some("Recorded Camera"));
    assert!(device.supports_info(CameraInfo::SerialNumber));
    assert!(!device.supports_info(CameraInfo::FirmwareVersion));
    assert_eq!(device.get_file_name(), "two_streams");
    assert_eq!(device.get_sensors_count(), 2);
    assert!(device.get_sensor(2).is_none());
    device.hardware_reset();
}

use crossbeam_channel::bounded;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::sensor::{PlaybackSensor, SensorHooks};
use crate::config::PlaybackConfig;
use crate::core::extrinsics::{from_pose, to_pose};
use crate::core::{Extrinsics, ExtrinsicsRegistry, LazyExtrinsics, StreamIdentifier, StreamProfile};
use crate::engine::{CancellableTimer, Dispatcher, PacingClock, PlaybackStatus};
use crate::error::{PlaybackError, Result};
use crate::reader::{RecordingReader, SerializedData};
use crate::snapshot::{CameraInfo, DeviceSnapshot};

const STATUS_CHANNEL_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a dispatched frame is paced and reported
#[derive(Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Normal read-loop delivery
    Paced,
    /// Immediate re-delivery while paused
    Immediate,
}

struct DeviceShared {
    weak_self: Weak<DeviceShared>,
    config: PlaybackConfig,
    reader: Mutex<Box<dyn RecordingReader>>,
    read_thread: Dispatcher,
    snapshot: DeviceSnapshot,
    file_name: String,
    duration: Duration,

    sensors: BTreeMap<u32, Arc<PlaybackSensor>>,
    active_sensors: Mutex<BTreeMap<u32, Arc<PlaybackSensor>>>,

    is_started: AtomicBool,
    is_paused: AtomicBool,
    real_time: AtomicBool,
    /// f64 bits
    sample_rate: AtomicU64,
    loop_epoch: AtomicU64,

    clock: Mutex<PacingClock>,
    prev_timestamp: Mutex<Duration>,
    last_published: Mutex<Option<Duration>>,

    extrinsics: ExtrinsicsRegistry,
    /// Strong owners of the registry's weak links
    extrinsics_links: Vec<Arc<LazyExtrinsics>>,

    status_tx: broadcast::Sender<PlaybackStatus>,
}

fn upgrade(device: &Weak<DeviceShared>) -> Result<Arc<DeviceShared>> {
    device.upgrade().ok_or(PlaybackError::DeviceGone)
}

fn sensor_hooks(device: &Weak<DeviceShared>) -> SensorHooks {
    let started = device.clone();
    let stopped = device.clone();
    let opened = device.clone();
    let closed = device.clone();
    SensorHooks {
        on_started: Box::new(move |index| upgrade(&started)?.sensor_started(index)),
        on_stopped: Box::new(move |index, invoke_required| {
            upgrade(&stopped)?.sensor_stopped(index, invoke_required)
        }),
        on_opened: Box::new(move |_, filters| {
            let filters = filters.to_vec();
            upgrade(&opened)?.run_on_reader("open", move |device| {
                device.reader().enable_stream(&filters)?;
                Ok(())
            })
        }),
        on_closed: Box::new(move |_, filters| {
            let filters = filters.to_vec();
            upgrade(&closed)?.run_on_reader("close", move |device| {
                device.reader().disable_stream(&filters)?;
                Ok(())
            })
        }),
    }
}

/// Pair every two streams that share an extrinsics group
fn build_extrinsics(
    snapshot: &DeviceSnapshot,
    sensors: &BTreeMap<u32, Arc<PlaybackSensor>>,
) -> (ExtrinsicsRegistry, Vec<Arc<LazyExtrinsics>>) {
    let mut placed: Vec<(u32, u32, Extrinsics)> = Vec::new();
    for (index, sensor) in sensors {
        for profile in sensor.get_stream_profiles() {
            let id = StreamIdentifier::for_profile(*index, profile);
            if let Some(entry) = snapshot.extrinsics.get(&id) {
                placed.push((profile.unique_id, entry.group, entry.to_reference));
            }
        }
    }

    let registry = ExtrinsicsRegistry::new();
    let mut links = Vec::new();
    for (i, &(from_id, from_group, from_ref)) in placed.iter().enumerate() {
        for &(to_id, to_group, to_ref) in &placed[i + 1..] {
            if from_group != to_group {
                continue;
            }
            let link = Arc::new(LazyExtrinsics::new(move || {
                from_pose(&to_pose(&to_ref).inverse().compose(&to_pose(&from_ref)))
            }));
            registry.register(from_id, to_id, &link);
            links.push(link);
        }
    }
    (registry, links)
}

impl DeviceShared {
    fn reader(&self) -> MutexGuard<'_, Box<dyn RecordingReader>> {
        lock(&self.reader)
    }

    fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate.load(Ordering::Acquire))
    }

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus::from_flags(
            self.is_started.load(Ordering::Acquire),
            self.is_paused.load(Ordering::Acquire),
        )
    }

    fn signal(&self, status: PlaybackStatus) {
        info!(file = %self.file_name, %status, "playback status changed");
        // no subscribers is fine
        let _ = self.status_tx.send(status);
    }

    fn active(&self) -> Vec<Arc<PlaybackSensor>> {
        lock(&self.active_sensors).values().cloned().collect()
    }

    fn interrupt_delivery(&self) {
        for sensor in self.sensors.values() {
            sensor.interrupt();
        }
        self.read_thread.interrupt();
    }

    /// Run `op` on the reader thread and wait for it
    fn run_on_reader<T, F>(&self, name: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DeviceShared) -> Result<T> + Send + 'static,
    {
        if self.read_thread.is_current_thread() {
            debug_assert!(false, "{} called from the reader thread", name);
            error!(op = name, "blocking control operation called from the reader thread");
            return Err(PlaybackError::Deadlock(name));
        }

        self.interrupt_delivery();
        let (tx, rx) = bounded(1);
        let device = self.weak_self.clone();
        let queued = self.read_thread.invoke(move |_| {
            let result = match device.upgrade() {
                Some(device) => op(device.as_ref()),
                None => Err(PlaybackError::DeviceGone),
            };
            let _ = tx.send(result);
        });
        if !queued {
            return Err(PlaybackError::DeviceGone);
        }

        if !self.read_thread.flush(self.config.control_timeout()) {
            debug_assert!(false, "{} did not complete on the reader thread", name);
            error!(op = name, "control operation timed out, possible deadlock");
            return Err(PlaybackError::Deadlock(name));
        }
        rx.try_recv().unwrap_or(Err(PlaybackError::DeviceGone))
    }

    fn sensor_started(&self, index: u32) -> Result<()> {
        self.run_on_reader("start", move |device| {
            if let Some(sensor) = device.sensors.get(&index) {
                lock(&device.active_sensors).insert(index, sensor.clone());
            }
            device.start_internal();
            Ok(())
        })
    }

    fn sensor_stopped(&self, index: u32, invoke_required: bool) -> Result<()> {
        if !invoke_required || self.read_thread.is_current_thread() {
            self.deactivate(index);
            return Ok(());
        }
        self.run_on_reader("stop", move |device| {
            device.deactivate(index);
            Ok(())
        })
    }

    fn deactivate(&self, index: u32) {
        let now_empty = {
            let mut active = lock(&self.active_sensors);
            active.remove(&index).is_some() && active.is_empty()
        };
        if now_empty {
            self.stop_internal();
        }
    }

    fn start_internal(&self) {
        if self.is_started.load(Ordering::Acquire) {
            return;
        }
        if lock(&self.active_sensors).is_empty() {
            debug!("start ignored, no sensor is streaming");
            return;
        }

        self.is_started.store(true, Ordering::Release);
        lock(&self.clock).reset();
        self.signal(self.status());
        if !self.is_paused.load(Ordering::Acquire) {
            self.kick_loop();
        }
    }

    fn stop_internal(&self) {
        if !self.is_started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.is_paused.store(false, Ordering::Release);

        for sensor in self.active() {
            sensor.flush_pending_frames();
        }
        if let Err(err) = self.reader().reset() {
            warn!(error = %err, "reader reset failed");
        }
        *lock(&self.prev_timestamp) = Duration::ZERO;
        *lock(&self.last_published) = None;
        lock(&self.clock).reset();
        self.signal(PlaybackStatus::Stopped);
    }

    /// Stop every streaming sensor from the reader thread
    fn stop_all_sensors(&self) {
        for sensor in self.active() {
            if let Err(err) = sensor.stop(false) {
                warn!(sensor = sensor.index(), error = %err, "sensor stop failed");
            }
        }
        self.stop_internal();
    }

    fn pause_internal(&self) {
        if self.is_paused.load(Ordering::Acquire) {
            return;
        }
        let started = self.is_started.load(Ordering::Acquire);
        if started {
            for sensor in self.active() {
                sensor.flush_pending_frames();
            }
        }
        self.is_paused.store(true, Ordering::Release);
        if started {
            self.signal(PlaybackStatus::Paused);
        }
    }

    fn resume_internal(&self) -> Result<()> {
        if !self.is_paused.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.is_started.load(Ordering::Acquire) {
            self.is_paused.store(false, Ordering::Release);
            return Ok(());
        }

        let last = *lock(&self.last_published);
        let mut first = None;
        if let Some(last) = last {
            let mut reader = self.reader();
            reader.seek_to_time(last)?;
            loop {
                match reader.read_next_data()? {
                    SerializedData::Frame { frame, .. } if frame.timestamp <= last => continue,
                    data @ SerializedData::Frame { .. } => {
                        first = Some(data);
                        break;
                    }
                    SerializedData::EndOfFile => break,
                    _ => continue,
                }
            }
        }

        self.is_paused.store(false, Ordering::Release);
        let anchor = first
            .as_ref()
            .map(SerializedData::timestamp)
            .unwrap_or_else(|| *lock(&self.prev_timestamp));
        *lock(&self.prev_timestamp) = anchor;
        lock(&self.clock).anchor(anchor);
        if let Some(data) = first {
            self.dispatch(data, Delivery::Paced);
        }
        self.kick_loop();
        self.signal(PlaybackStatus::Playing);
        Ok(())
    }

    fn seek_internal(&self, time: Duration) -> Result<()> {
        for sensor in self.active() {
            sensor.flush_pending_frames();
        }

        let (description, last_frames) = {
            let mut reader = self.reader();
            reader.seek_to_time(time)?;
            let description = reader.query_device_description(time)?;
            let paused = self.is_paused.load(Ordering::Acquire) && self.is_started.load(Ordering::Acquire);
            let last_frames = if paused { reader.fetch_last_frames(time)? } else { Vec::new() };
            (description, last_frames)
        };

        for (index, sensor) in &self.sensors {
            if let Some(snapshot) = description.sensor(*index) {
                sensor.refresh_options(snapshot);
            }
        }

        *lock(&self.prev_timestamp) = time;
        lock(&self.clock).anchor(time);

        for data in last_frames {
            self.dispatch(data, Delivery::Immediate);
        }
        for sensor in self.active() {
            sensor.flush_pending_frames();
        }
        *lock(&self.last_published) = Some(time);
        debug!(position = ?time, "seek complete");
        Ok(())
    }

    /// Re-anchor pacing at the current position
    fn catch_up(&self) {
        let position = *lock(&self.prev_timestamp);
        lock(&self.clock).anchor(position);
    }

    fn calc_sleep_time(&self, timestamp: Duration) -> Duration {
        let rate = self.sample_rate();
        lock(&self.clock).sleep_time(timestamp, rate)
    }

    fn kick_loop(&self) {
        let epoch = self.loop_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.schedule_iteration(epoch);
    }

    fn schedule_iteration(&self, epoch: u64) {
        let device = self.weak_self.clone();
        self.read_thread.invoke(move |timer| {
            let Some(device) = device.upgrade() else {
                return;
            };
            let proceed = panic::catch_unwind(AssertUnwindSafe(|| device.read_iteration(epoch, timer)))
                .unwrap_or_else(|_| {
                    error!("read iteration panicked, treating as end of file");
                    device.handle_end_of_file();
                    false
                });
            if proceed {
                device.schedule_iteration(epoch);
            }
        });
    }

    /// One step of the read loop; false ends the loop
    fn read_iteration(&self, epoch: u64, timer: &CancellableTimer) -> bool {
        if self.loop_epoch.load(Ordering::Acquire) != epoch
            || !self.is_started.load(Ordering::Acquire)
            || self.is_paused.load(Ordering::Acquire)
        {
            return false;
        }

        let data = match self.reader().read_next_data() {
            Ok(data) => data,
            Err(err) => {
                let reason = format!("{:#}", err);
                warn!(error = %reason, "read failed, treating as end of file");
                SerializedData::EndOfFile
            }
        };
        if let SerializedData::EndOfFile = data {
            self.handle_end_of_file();
            return false;
        }

        let timestamp = data.timestamp();
        if !timestamp.is_zero() {
            *lock(&self.prev_timestamp) = timestamp;
        }
        if data.is_frame() {
            let mut clock = lock(&self.clock);
            if !clock.is_anchored() {
                clock.anchor(timestamp);
            }
        }

        if self.real_time.load(Ordering::Acquire)
            && !timestamp.is_zero()
            && self.active().iter().any(|sensor| sensor.has_pending_frames())
        {
            let wait = self.calc_sleep_time(timestamp);
            if !wait.is_zero() {
                timer.try_sleep(wait);
            }
        }

        self.dispatch(data, Delivery::Paced);
        self.is_started.load(Ordering::Acquire) && !self.is_paused.load(Ordering::Acquire)
    }

    fn handle_end_of_file(&self) {
        info!(file = %self.file_name, "end of recording");
        self.stop_all_sensors();
    }

    fn dispatch(&self, data: SerializedData, delivery: Delivery) {
        match data {
            SerializedData::Frame { stream, frame } => {
                let sensor = lock(&self.active_sensors).get(&stream.sensor_index).cloned();
                let Some(sensor) = sensor else {
                    debug!(%stream, "sensor not streaming, dropping frame");
                    return;
                };
                match delivery {
                    Delivery::Paced => {
                        let pacing = self.weak_self.clone();
                        let pause = self.weak_self.clone();
                        let publish = self.weak_self.clone();
                        sensor.handle_frame(
                            frame,
                            stream,
                            self.real_time.load(Ordering::Acquire),
                            move |ts| pacing.upgrade().map(|d| d.calc_sleep_time(ts)).unwrap_or_default(),
                            move || pause.upgrade().map_or(true, |d| d.is_paused.load(Ordering::Acquire)),
                            move |ts| {
                                if let Some(device) = publish.upgrade() {
                                    let mut last = lock(&device.last_published);
                                    *last = Some(last.map_or(ts, |prev| prev.max(ts)));
                                }
                            },
                        );
                    }
                    Delivery::Immediate => {
                        sensor.handle_frame(frame, stream, false, |_| Duration::ZERO, || false, |_| {});
                    }
                }
            }
            SerializedData::OptionChange {
                sensor_index,
                option,
                value,
                ..
            } => match self.sensors.get(&sensor_index) {
                Some(sensor) => {
                    sensor.update_option(option, value);
                }
                None => warn!(sensor = sensor_index, "option change for unknown sensor"),
            },
            SerializedData::Notification {
                sensor_index,
                notification,
                ..
            } => match self.sensors.get(&sensor_index) {
                Some(sensor) => sensor.raise_notification(notification),
                None => warn!(sensor = sensor_index, "notification for unknown sensor"),
            },
            SerializedData::InvalidFrame { timestamp, reason } => {
                warn!(?timestamp, %reason, "skipping invalid sample");
            }
            SerializedData::EndOfFile => {}
        }
    }
}

/// Device that replays a recording through a live-device control surface
///
/// Every control operation runs on a single reader thread and returns once
/// the transition is visible. Frames are delivered on one thread per open
/// stream.
pub struct PlaybackDevice {
    inner: Arc<DeviceShared>,
}

impl PlaybackDevice {
    /// Open with default configuration
    pub fn open<R>(reader: R) -> Result<Self>
    where
        R: RecordingReader + 'static,
    {
        Self::new(Box::new(reader), PlaybackConfig::default())
    }

    pub fn new(mut reader: Box<dyn RecordingReader>, config: PlaybackConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| PlaybackError::InvalidValue(format!("{:#}", err)))?;

        let snapshot = reader.query_device_description(Duration::ZERO)?;
        let duration = reader.query_duration();
        let file_name = reader.file_name().to_string();
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let inner = Arc::new_cyclic(|weak: &Weak<DeviceShared>| {
            let sensors: BTreeMap<u32, Arc<PlaybackSensor>> = snapshot
                .sensors
                .iter()
                .enumerate()
                .map(|(index, sensor)| {
                    let index = index as u32;
                    (index, Arc::new(PlaybackSensor::new(index, sensor, sensor_hooks(weak), &config)))
                })
                .collect();
            let (extrinsics, extrinsics_links) = build_extrinsics(&snapshot, &sensors);

            DeviceShared {
                weak_self: weak.clone(),
                real_time: AtomicBool::new(config.real_time),
                sample_rate: AtomicU64::new(config.frame_rate.to_bits()),
                read_thread: Dispatcher::unbounded("reader"),
                reader: Mutex::new(reader),
                snapshot,
                file_name,
                duration,
                sensors,
                active_sensors: Mutex::new(BTreeMap::new()),
                is_started: AtomicBool::new(false),
                is_paused: AtomicBool::new(false),
                loop_epoch: AtomicU64::new(0),
                clock: Mutex::new(PacingClock::new()),
                prev_timestamp: Mutex::new(Duration::ZERO),
                last_published: Mutex::new(None),
                extrinsics,
                extrinsics_links,
                status_tx,
                config,
            }
        });
        inner.read_thread.start()?;

        info!(
            file = %inner.file_name,
            sensors = inner.sensors.len(),
            extrinsics = inner.extrinsics_links.len(),
            duration = ?inner.duration,
            "playback device opened"
        );
        Ok(Self { inner })
    }

    /// Start playback if any sensor is streaming; sensors normally do this
    pub fn start(&self) -> Result<()> {
        self.inner.run_on_reader("start", |device| {
            device.start_internal();
            Ok(())
        })
    }

    /// Stop every streaming sensor and rewind
    pub fn stop(&self) -> Result<()> {
        self.inner.run_on_reader("stop", |device| {
            device.stop_all_sensors();
            Ok(())
        })
    }

    pub fn pause(&self) -> Result<()> {
        self.inner.run_on_reader("pause", |device| {
            device.pause_internal();
            Ok(())
        })
    }

    pub fn resume(&self) -> Result<()> {
        self.inner.run_on_reader("resume", |device| device.resume_internal())
    }

    /// Move the playback position; while paused the last frame of every
    /// open stream at or before `time` is delivered again before returning
    pub fn seek_to_time(&self, time: Duration) -> Result<()> {
        if time > self.inner.duration {
            return Err(PlaybackError::InvalidValue(format!(
                "seek to {:?} past the end of {:?}",
                time, self.inner.duration
            )));
        }
        self.inner.run_on_reader("seek", move |device| device.seek_internal(time))
    }

    /// Scale playback speed; must be positive
    pub fn set_frame_rate(&self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(PlaybackError::InvalidValue(format!(
                "frame rate must be positive, got {}",
                rate
            )));
        }
        self.inner.run_on_reader("set_frame_rate", move |device| {
            device.sample_rate.store(rate.to_bits(), Ordering::Release);
            device.catch_up();
            debug!(rate, "frame rate changed");
            Ok(())
        })
    }

    pub fn get_frame_rate(&self) -> f64 {
        self.inner.sample_rate()
    }

    pub fn set_real_time(&self, real_time: bool) -> Result<()> {
        self.inner.run_on_reader("set_real_time", move |device| {
            device.real_time.store(real_time, Ordering::Release);
            device.catch_up();
            Ok(())
        })
    }

    pub fn is_real_time(&self) -> bool {
        self.inner.real_time.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.is_paused.load(Ordering::Acquire)
    }

    pub fn get_current_status(&self) -> PlaybackStatus {
        self.inner.status()
    }

    /// One value per externally visible status transition
    pub fn subscribe_status(&self) -> broadcast::Receiver<PlaybackStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn get_duration(&self) -> Duration {
        self.inner.duration
    }

    /// Timestamp of the most recently read sample
    pub fn get_position(&self) -> Duration {
        *lock(&self.inner.prev_timestamp)
    }

    pub fn get_file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn get_sensor(&self, index: u32) -> Option<Arc<PlaybackSensor>> {
        self.inner.sensors.get(&index).cloned()
    }

    pub fn get_sensors_count(&self) -> usize {
        self.inner.sensors.len()
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Arc<PlaybackSensor>> {
        self.inner.sensors.values()
    }

    /// Transform from `from`'s reference frame into `to`'s
    pub fn get_extrinsics(&self, from: &StreamProfile, to: &StreamProfile) -> Option<Extrinsics> {
        self.inner.extrinsics.fetch(from.unique_id, to.unique_id)
    }

    pub fn get_info(&self, info: CameraInfo) -> Option<&str> {
        self.inner
            .snapshot
            .device_extensions
            .info()
            .and_then(|snapshot| snapshot.get(info))
    }

    pub fn supports_info(&self, info: CameraInfo) -> bool {
        self.get_info(info).is_some()
    }

    /// Recordings cannot be reset
    pub fn hardware_reset(&self) {
        debug!("hardware_reset ignored during playback");
    }
}

impl Drop for PlaybackDevice {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "failed to stop playback on drop");
        }
        self.inner.read_thread.stop();
    }
}

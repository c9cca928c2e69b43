use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::PlaybackConfig;
use crate::core::{Frame, FrameCallback, Notification, NotificationCallback, StreamIdentifier, StreamProfile};
use crate::engine::Dispatcher;
use crate::error::{PlaybackError, Result};
use crate::snapshot::{
    CameraInfo, ExtensionKind, ExtensionSnapshot, Extensions, OptionId, OptionRange, OptionsSnapshot,
    SensorSnapshot,
};

type StreamsHook = Box<dyn Fn(u32, &[StreamIdentifier]) -> Result<()> + Send + Sync>;

/// Callbacks a sensor uses to tell its owning device about lifecycle changes
///
/// Registered once at construction. `on_stopped` receives `invoke_required`:
/// false when the stop is already running on the device's reader thread.
pub struct SensorHooks {
    pub on_started: Box<dyn Fn(u32) -> Result<()> + Send + Sync>,
    pub on_stopped: Box<dyn Fn(u32, bool) -> Result<()> + Send + Sync>,
    pub on_opened: StreamsHook,
    pub on_closed: StreamsHook,
}

impl SensorHooks {
    /// Hooks that do nothing, for a sensor driven without a device
    pub fn detached() -> Self {
        Self {
            on_started: Box::new(|_| Ok(())),
            on_stopped: Box::new(|_, _| Ok(())),
            on_opened: Box::new(|_, _| Ok(())),
            on_closed: Box::new(|_, _| Ok(())),
        }
    }
}

struct StreamChannel {
    profile: Arc<StreamProfile>,
    dispatcher: Arc<Dispatcher>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replays one recorded sensor through the live-sensor control surface
pub struct PlaybackSensor {
    index: u32,
    profiles: Vec<Arc<StreamProfile>>,
    extensions: Extensions,
    options: Mutex<OptionsSnapshot>,
    streams: Mutex<HashMap<u32, StreamChannel>>,
    started: AtomicBool,
    callback: Mutex<Option<FrameCallback>>,
    notifications: Mutex<Option<NotificationCallback>>,
    hooks: SensorHooks,
    queue_capacity: usize,
    flush_timeout: Duration,
}

impl PlaybackSensor {
    pub fn new(index: u32, snapshot: &SensorSnapshot, hooks: SensorHooks, config: &PlaybackConfig) -> Self {
        let profiles = snapshot
            .stream_profiles
            .iter()
            .map(|profile| Arc::new(profile.reindexed()))
            .collect();
        let options = snapshot.extensions.options().cloned().unwrap_or_default();

        Self {
            index,
            profiles,
            extensions: snapshot.extensions.clone(),
            options: Mutex::new(options),
            streams: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            callback: Mutex::new(None),
            notifications: Mutex::new(None),
            hooks,
            queue_capacity: config.stream_queue_capacity,
            flush_timeout: config.control_timeout(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Recorded profiles, each carrying an id unique to this process
    pub fn get_stream_profiles(&self) -> &[Arc<StreamProfile>] {
        &self.profiles
    }

    /// Profiles currently open
    pub fn get_active_streams(&self) -> Vec<Arc<StreamProfile>> {
        let mut active: Vec<_> = lock(&self.streams)
            .values()
            .map(|channel| channel.profile.clone())
            .collect();
        active.sort_by_key(|profile| profile.unique_id);
        active
    }

    pub fn is_streaming(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn identifier(&self, profile: &StreamProfile) -> StreamIdentifier {
        StreamIdentifier::for_profile(self.index, profile)
    }

    /// Open one delivery queue per requested profile
    pub fn open(&self, requests: &[StreamProfile]) -> Result<()> {
        if self.is_streaming() {
            return Err(PlaybackError::WrongCallSequence(format!(
                "open() called on streaming sensor {}",
                self.index
            )));
        }

        let mut selected = Vec::with_capacity(requests.len());
        for request in requests {
            let profile = self
                .profiles
                .iter()
                .find(|p| p.unique_id == request.unique_id)
                .ok_or_else(|| {
                    PlaybackError::InvalidRequest(format!(
                        "profile {} was not recorded for sensor {}",
                        request, self.index
                    ))
                })?;
            selected.push(profile.clone());
        }

        let filters: Vec<StreamIdentifier> = {
            let mut streams = lock(&self.streams);
            if !streams.is_empty() {
                return Err(PlaybackError::WrongCallSequence(format!(
                    "sensor {} is already open",
                    self.index
                )));
            }

            for profile in &selected {
                let dispatcher = Dispatcher::new(
                    format!("s{}-{:?}{}", self.index, profile.stream_type, profile.stream_index),
                    self.queue_capacity,
                );
                dispatcher.start()?;
                streams.insert(
                    profile.unique_id,
                    StreamChannel {
                        profile: profile.clone(),
                        dispatcher: Arc::new(dispatcher),
                    },
                );
            }
            selected.iter().map(|profile| self.identifier(profile)).collect()
        };

        debug!(sensor = self.index, streams = filters.len(), "sensor opened");
        (self.hooks.on_opened)(self.index, &filters)
    }

    /// Flush and release every delivery queue
    pub fn close(&self) -> Result<()> {
        let channels: Vec<StreamChannel> = lock(&self.streams).drain().map(|(_, channel)| channel).collect();
        if channels.is_empty() {
            return Ok(());
        }

        let mut filters = Vec::with_capacity(channels.len());
        for channel in channels {
            if !channel.dispatcher.flush(self.flush_timeout) {
                warn!(sensor = self.index, stream = %channel.profile, "stream flush timed out on close");
            }
            channel.dispatcher.stop();
            filters.push(self.identifier(&channel.profile));
        }

        debug!(sensor = self.index, "sensor closed");
        (self.hooks.on_closed)(self.index, &filters)
    }

    pub fn start(&self, callback: FrameCallback) -> Result<()> {
        if lock(&self.streams).is_empty() {
            return Err(PlaybackError::WrongCallSequence(format!(
                "start() called before open() on sensor {}",
                self.index
            )));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        *lock(&self.callback) = Some(callback);
        debug!(sensor = self.index, "sensor started");
        if let Err(err) = (self.hooks.on_started)(self.index) {
            self.started.store(false, Ordering::Release);
            *lock(&self.callback) = None;
            return Err(err);
        }
        Ok(())
    }

    /// Stop streaming; pass `invoke_required = false` only from the reader thread
    pub fn stop(&self, invoke_required: bool) -> Result<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.flush_pending_frames();
        *lock(&self.callback) = None;
        debug!(sensor = self.index, "sensor stopped");
        (self.hooks.on_stopped)(self.index, invoke_required)
    }

    /// Queue `frame` for delivery on its stream
    ///
    /// Inside the delivery task the frame waits `calc_sleep(timestamp)` when
    /// real-time, is dropped if `is_paused()` holds by then, and otherwise goes
    /// to the callback before `record_published(timestamp)` runs.
    pub fn handle_frame<S, P, R>(
        &self,
        mut frame: Frame,
        stream: StreamIdentifier,
        is_real_time: bool,
        calc_sleep: S,
        is_paused: P,
        record_published: R,
    ) where
        S: FnOnce(Duration) -> Duration + Send + 'static,
        P: FnOnce() -> bool + Send + 'static,
        R: FnOnce(Duration) + Send + 'static,
    {
        if !self.is_streaming() {
            trace!(sensor = self.index, "sensor not started, dropping frame");
            return;
        }
        let Some(callback) = lock(&self.callback).clone() else {
            return;
        };

        let (profile, dispatcher) = {
            let streams = lock(&self.streams);
            match streams
                .values()
                .find(|channel| channel.profile.same_stream(stream.stream_type, stream.stream_index))
            {
                Some(channel) => (channel.profile.clone(), channel.dispatcher.clone()),
                None => {
                    trace!(sensor = self.index, %stream, "stream not open, dropping frame");
                    return;
                }
            }
        };

        frame.stamp(self.index, profile);
        let sensor = self.index;
        dispatcher.invoke(move |timer| {
            let timestamp = frame.timestamp;
            if is_real_time {
                let wait = calc_sleep(timestamp);
                if !wait.is_zero() && !timer.try_sleep(wait) {
                    trace!(sensor, "pacing sleep interrupted");
                }
            }
            if is_paused() {
                trace!(sensor, ?timestamp, "paused, dropping frame");
                return;
            }
            callback(frame);
            record_published(timestamp);
        });

        if is_real_time && !dispatcher.flush(self.flush_timeout) {
            warn!(sensor = self.index, %stream, "frame delivery is falling behind");
        }
    }

    /// Wait until every queued frame has been delivered or discarded
    pub fn flush_pending_frames(&self) -> bool {
        let dispatchers: Vec<_> = lock(&self.streams)
            .values()
            .map(|channel| channel.dispatcher.clone())
            .collect();
        let mut flushed = true;
        for dispatcher in dispatchers {
            if !dispatcher.flush(self.flush_timeout) {
                warn!(sensor = self.index, stream = dispatcher.name(), "pending frames not flushed");
                flushed = false;
            }
        }
        flushed
    }

    pub fn has_pending_frames(&self) -> bool {
        lock(&self.streams)
            .values()
            .any(|channel| channel.dispatcher.pending() > 0)
    }

    /// Cut short any pacing sleep in the delivery queues
    pub fn interrupt(&self) {
        for channel in lock(&self.streams).values() {
            channel.dispatcher.interrupt();
        }
    }

    pub fn register_notifications_callback(&self, callback: NotificationCallback) {
        *lock(&self.notifications) = Some(callback);
    }

    pub fn raise_notification(&self, notification: Notification) {
        let callback = lock(&self.notifications).clone();
        match callback {
            Some(callback) => callback(notification),
            None => debug!(
                sensor = self.index,
                description = %notification.description,
                "notification without listener"
            ),
        }
    }

    /// Apply a recorded option change
    pub fn update_option(&self, option: OptionId, value: f32) -> bool {
        let updated = lock(&self.options).set_value(option, value);
        if !updated {
            debug!(sensor = self.index, ?option, "option change for unsupported option");
        }
        updated
    }

    /// Take option values from a freshly queried description
    pub fn refresh_options(&self, snapshot: &SensorSnapshot) {
        if let Some(recorded) = snapshot.extensions.options() {
            let mut options = lock(&self.options);
            for (id, entry) in &recorded.options {
                options.set_value(*id, entry.value);
            }
        }
    }

    pub fn get_option(&self, option: OptionId) -> Option<f32> {
        lock(&self.options).get(option).map(|entry| entry.value)
    }

    pub fn supports_option(&self, option: OptionId) -> bool {
        lock(&self.options).get(option).is_some()
    }

    pub fn get_option_range(&self, option: OptionId) -> Option<OptionRange> {
        lock(&self.options).get(option).map(|entry| entry.range)
    }

    pub fn get_info(&self, info: CameraInfo) -> Option<&str> {
        self.extensions.info().and_then(|snapshot| snapshot.get(info))
    }

    pub fn supports_info(&self, info: CameraInfo) -> bool {
        self.get_info(info).is_some()
    }

    /// Extension as recorded; live option values go through [`get_option`]
    ///
    /// [`get_option`]: PlaybackSensor::get_option
    pub fn extension(&self, kind: ExtensionKind) -> Option<&ExtensionSnapshot> {
        self.extensions.find(kind)
    }

    pub fn depth_units(&self) -> Option<f32> {
        self.extensions.depth_units()
    }
}

impl Drop for PlaybackSensor {
    fn drop(&mut self) {
        for (_, channel) in lock(&self.streams).drain() {
            channel.dispatcher.stop();
        }
    }
}

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::recording::{RecordedSample, Recording};
use super::traits::{RecordingReader, SerializedData};
use crate::core::{Frame, StreamIdentifier};
use crate::snapshot::DeviceSnapshot;

/// Reader over a fully loaded [`Recording`]
///
/// Frames are only produced for enabled streams. Option changes,
/// notifications and invalid samples are produced regardless.
pub struct MemoryReader {
    recording: Recording,
    cursor: usize,
    enabled: HashSet<StreamIdentifier>,
}

impl MemoryReader {
    pub fn new(mut recording: Recording) -> Self {
        recording.sort();
        Self {
            recording,
            cursor: 0,
            enabled: HashSet::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let recording = Recording::load(path)?;
        debug!(
            file = %recording.file_name,
            samples = recording.samples.len(),
            "recording loaded"
        );
        Ok(Self::new(recording))
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    fn decode(sample: &RecordedSample) -> SerializedData {
        match sample {
            RecordedSample::Frame {
                timestamp_ns,
                stream,
                frame_number,
                data,
            } => SerializedData::Frame {
                stream: *stream,
                frame: Frame::new(Duration::from_nanos(*timestamp_ns), *frame_number).with_data(data.clone()),
            },
            RecordedSample::Option {
                timestamp_ns,
                sensor_index,
                option,
                value,
            } => SerializedData::OptionChange {
                timestamp: Duration::from_nanos(*timestamp_ns),
                sensor_index: *sensor_index,
                option: *option,
                value: *value,
            },
            RecordedSample::Notification {
                timestamp_ns,
                sensor_index,
                notification,
            } => SerializedData::Notification {
                timestamp: Duration::from_nanos(*timestamp_ns),
                sensor_index: *sensor_index,
                notification: notification.clone(),
            },
            RecordedSample::Invalid { timestamp_ns, reason } => SerializedData::InvalidFrame {
                timestamp: Duration::from_nanos(*timestamp_ns),
                reason: reason.clone(),
            },
        }
    }

    fn is_visible(&self, sample: &RecordedSample) -> bool {
        match sample {
            RecordedSample::Frame { stream, .. } => self.enabled.contains(stream),
            _ => true,
        }
    }
}

impl RecordingReader for MemoryReader {
    fn query_device_description(&mut self, at: Duration) -> Result<DeviceSnapshot> {
        let mut device = self.recording.device.clone();
        for sample in self.recording.samples.iter().take_while(|s| s.timestamp() <= at) {
            if let RecordedSample::Option {
                sensor_index,
                option,
                value,
                ..
            } = sample
            {
                device.apply_option(*sensor_index, *option, *value);
            }
        }
        Ok(device)
    }

    fn read_next_data(&mut self) -> Result<SerializedData> {
        while let Some(sample) = self.recording.samples.get(self.cursor) {
            self.cursor += 1;
            if self.is_visible(sample) {
                return Ok(Self::decode(sample));
            }
        }
        Ok(SerializedData::EndOfFile)
    }

    fn seek_to_time(&mut self, time: Duration) -> Result<()> {
        self.cursor = self.recording.samples.partition_point(|s| s.timestamp() < time);
        Ok(())
    }

    fn fetch_last_frames(&mut self, at: Duration) -> Result<Vec<SerializedData>> {
        let end = self.recording.samples.partition_point(|s| s.timestamp() <= at);
        let mut seen = HashSet::new();
        let mut frames = Vec::new();
        for sample in self.recording.samples[..end].iter().rev() {
            if let RecordedSample::Frame { stream, .. } = sample {
                if self.enabled.contains(stream) && seen.insert(*stream) {
                    frames.push(Self::decode(sample));
                }
            }
        }
        frames.reverse();
        Ok(frames)
    }

    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn query_duration(&self) -> Duration {
        self.recording.duration()
    }

    fn enable_stream(&mut self, filters: &[StreamIdentifier]) -> Result<()> {
        self.enabled.extend(filters.iter().copied());
        Ok(())
    }

    fn disable_stream(&mut self, filters: &[StreamIdentifier]) -> Result<()> {
        for filter in filters {
            self.enabled.remove(filter);
        }
        Ok(())
    }

    fn file_name(&self) -> &str {
        &self.recording.file_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StreamType;
    use crate::snapshot::{ExtensionSnapshot, Extensions, OptionId, OptionRange, OptionsSnapshot, SensorSnapshot};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn depth() -> StreamIdentifier {
        StreamIdentifier::new(0, StreamType::Depth, 0)
    }

    fn color() -> StreamIdentifier {
        StreamIdentifier::new(1, StreamType::Color, 0)
    }

    fn device() -> DeviceSnapshot {
        let options = OptionsSnapshot::default().with(
            OptionId::Exposure,
            100.0,
            OptionRange {
                min: 1.0,
                max: 1000.0,
                step: 1.0,
                default: 100.0,
            },
        );
        DeviceSnapshot {
            sensors: vec![SensorSnapshot::new(
                Extensions::new().with(ExtensionSnapshot::Options(options)),
                Vec::new(),
            )],
            ..Default::default()
        }
    }

    fn reader() -> MemoryReader {
        let recording = Recording::new("memory", device())
            .with_frame(ms(10), depth(), 1)
            .with_frame(ms(15), color(), 1)
            .with_option(ms(18), 0, OptionId::Exposure, 200.0)
            .with_frame(ms(20), depth(), 2)
            .with_frame(ms(30), color(), 2);
        MemoryReader::new(recording)
    }

    fn drain(reader: &mut MemoryReader) -> Vec<(u128, bool)> {
        let mut out = Vec::new();
        loop {
            match reader.read_next_data().unwrap() {
                SerializedData::EndOfFile => return out,
                data => out.push((data.timestamp().as_millis(), data.is_frame())),
            }
        }
    }

    #[test]
    fn test_only_enabled_streams_produce_frames() {
        let mut reader = reader();
        assert_eq!(drain(&mut reader), vec![(18, false)]);

        reader.reset().unwrap();
        reader.enable_stream(&[depth()]).unwrap();
        assert_eq!(drain(&mut reader), vec![(10, true), (18, false), (20, true)]);

        reader.reset().unwrap();
        reader.disable_stream(&[depth()]).unwrap();
        reader.enable_stream(&[color()]).unwrap();
        assert_eq!(drain(&mut reader), vec![(15, true), (18, false), (30, true)]);
    }

    #[test]
    fn test_seek_positions_at_first_sample_not_before() {
        let mut reader = reader();
        reader.enable_stream(&[depth(), color()]).unwrap();
        reader.seek_to_time(ms(15)).unwrap();
        assert_eq!(drain(&mut reader), vec![(15, true), (18, false), (20, true), (30, true)]);
    }

    #[test]
    fn test_fetch_last_frames_per_stream() {
        let mut reader = reader();
        reader.enable_stream(&[depth(), color()]).unwrap();

        let frames = reader.fetch_last_frames(ms(15)).unwrap();
        let stamps: Vec<_> = frames.iter().map(|f| f.timestamp().as_millis()).collect();
        assert_eq!(stamps, vec![10, 15]);

        let frames = reader.fetch_last_frames(ms(25)).unwrap();
        let stamps: Vec<_> = frames.iter().map(|f| f.timestamp().as_millis()).collect();
        assert_eq!(stamps, vec![15, 20]);

        assert!(reader.fetch_last_frames(ms(5)).unwrap().is_empty());
    }

    #[test]
    fn test_description_applies_options_up_to_time() {
        let mut reader = reader();
        let exposure = |d: &DeviceSnapshot| {
            d.sensor(0)
                .and_then(|s| s.extensions.options())
                .and_then(|o| o.get(OptionId::Exposure))
                .map(|e| e.value)
        };

        assert_eq!(exposure(&reader.query_device_description(ms(10)).unwrap()), Some(100.0));
        assert_eq!(exposure(&reader.query_device_description(ms(18)).unwrap()), Some(200.0));
        assert_eq!(reader.query_duration(), ms(30));
        assert_eq!(reader.file_name(), "memory");
    }
}

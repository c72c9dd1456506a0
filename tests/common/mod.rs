#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use proximity_lighting::config::{SegmentMapping, Settings, SettingsHandle};
use proximity_lighting::coordinator::EventCoordinator;
use proximity_lighting::sink::{LightingSink, SegmentCommand, SinkError};
use proximity_lighting::state::{Rgb, SegmentIndex, SensorId, StateStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sink that remembers every command it was asked to send.
#[derive(Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<SegmentCommand>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn commands(&self) -> Vec<SegmentCommand> {
        self.commands.lock().clone()
    }

    /// Brightness commands as `(segments, brightness)` pairs.
    pub fn brightness_commands(&self) -> Vec<(Vec<SegmentIndex>, u8)> {
        self.commands
            .lock()
            .iter()
            .filter_map(|command| match command {
                SegmentCommand::Brightness {
                    segments,
                    brightness,
                } => Some((segments.clone(), *brightness)),
                SegmentCommand::Color { .. } => None,
            })
            .collect()
    }

    /// Make every following command fail after being recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, command: SegmentCommand) -> Result<(), SinkError> {
        self.commands.lock().push(command);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Transport("controller unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LightingSink for RecordingSink {
    async fn set_segment_brightness(
        &self,
        segments: &[SegmentIndex],
        brightness: u8,
    ) -> Result<(), SinkError> {
        self.record(SegmentCommand::brightness(segments, brightness)?)
    }

    async fn set_segment_color(
        &self,
        segments: &[SegmentIndex],
        color: Rgb,
    ) -> Result<(), SinkError> {
        self.record(SegmentCommand::color(segments, color))
    }
}

/// Four 100ms ramp steps, one second hold.
pub fn test_settings(mapping: SegmentMapping) -> Settings {
    Settings {
        segment_mapping: mapping,
        ramp_duration: Duration::from_millis(400),
        hold_duration: Duration::from_millis(1_000),
        steps: 4,
        ..Settings::default()
    }
}

pub struct Harness {
    pub store: Arc<StateStore>,
    pub sink: Arc<RecordingSink>,
    pub settings: Arc<SettingsHandle>,
    pub coordinator: Arc<EventCoordinator>,
}

impl Harness {
    pub fn new(mapping: SegmentMapping) -> Self {
        let settings = Arc::new(SettingsHandle::new(test_settings(mapping)).unwrap());
        let store = Arc::new(StateStore::new());
        let sink = Arc::new(RecordingSink::default());
        let coordinator = EventCoordinator::new(store.clone(), sink.clone(), settings.clone());
        Self {
            store,
            sink,
            settings,
            coordinator,
        }
    }

    pub fn brightness(&self, index: SegmentIndex) -> u8 {
        self.store.segment_state(index).unwrap().brightness
    }

    pub fn brightness_of(&self, segments: &[SegmentIndex]) -> Vec<u8> {
        segments.iter().map(|index| self.brightness(*index)).collect()
    }
}

/// Only `sensor` mapped, to `segments`.
pub fn single(sensor: SensorId, segments: &[SegmentIndex]) -> SegmentMapping {
    SegmentMapping::new().with(sensor, segments)
}

//! Domain types shared by the state store, the coordinator and observers.

use crate::input::ProximityEvent;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Index of a segment on the LED strip.
pub type SegmentIndex = u16;

/// Brightness used for a segment nobody is requesting.
pub const DEFAULT_BASELINE: u8 = 1;

/// The fixed set of proximity sensors wired to the strip.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum SensorId {
    Sensor1,
    Sensor2,
    Sensor3,
    Sensor4,
    Sensor5,
}

impl SensorId {
    /// One-based sensor number, as printed on the board.
    pub fn number(self) -> u8 {
        match self {
            SensorId::Sensor1 => 1,
            SensorId::Sensor2 => 2,
            SensorId::Sensor3 => 3,
            SensorId::Sensor4 => 4,
            SensorId::Sensor5 => 5,
        }
    }

    /// Lowercase name used in MQTT topics and environment variables.
    pub fn slug(self) -> String {
        self.as_ref().to_ascii_lowercase()
    }
}

/// Where a sensor is in its ramp/hold/decay lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SensorActivity {
    #[default]
    Idle,
    Increasing,
    Holding,
    Decreasing,
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into `0xRRGGBB`, the form most controllers accept.
    pub fn to_packed(self) -> u32 {
        (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Snapshot of one sensor as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorState {
    pub sensor: SensorId,
    /// Brightness the sensor last commanded for its own segments.
    pub current_brightness: u8,
    pub activity: SensorActivity,
    pub last_activity: Option<DateTime<Local>>,
    pub is_connected: bool,
    pub last_event: Option<ProximityEvent>,
    pub event_count: u64,
    /// Segments this sensor controls, in configured order.
    pub controlled_segments: Vec<SegmentIndex>,
}

impl SensorState {
    /// Idle sensor resting at `baseline`.
    pub fn new(sensor: SensorId, baseline: u8) -> Self {
        Self {
            sensor,
            current_brightness: baseline,
            activity: SensorActivity::Idle,
            last_activity: None,
            is_connected: true,
            last_event: None,
            event_count: 0,
            controlled_segments: Vec::new(),
        }
    }
}

/// Aggregated state of one LED segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedSegment {
    pub index: SegmentIndex,
    /// Effective brightness: the max of `requests`, or the baseline.
    pub brightness: u8,
    pub color: Rgb,
    pub last_update: Option<DateTime<Local>>,
    pub controlling_sensors: BTreeSet<SensorId>,
    pub requests: BTreeMap<SensorId, u8>,
}

impl LedSegment {
    pub fn new(index: SegmentIndex, baseline: u8) -> Self {
        Self {
            index,
            brightness: baseline,
            color: Rgb::WHITE,
            last_update: None,
            controlling_sensors: BTreeSet::new(),
            requests: BTreeMap::new(),
        }
    }

    /// Max of all active requests, falling back to `baseline`.
    pub fn effective_brightness(&self, baseline: u8) -> u8 {
        self.requests.values().copied().max().unwrap_or(baseline)
    }

    /// Recompute `brightness` from `requests`. Returns true if it changed.
    pub(crate) fn recompute(&mut self, baseline: u8) -> bool {
        let effective = self.effective_brightness(baseline);
        if effective == self.brightness {
            return false;
        }
        self.brightness = effective;
        self.last_update = Some(Local::now());
        true
    }

    /// True when `sensor` is the only sensor with an active request.
    pub fn is_sole_requester(&self, sensor: SensorId) -> bool {
        self.requests.len() == 1 && self.requests.contains_key(&sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_sensor_parse_is_case_insensitive() {
        assert_eq!(SensorId::from_str("sensor3").unwrap(), SensorId::Sensor3);
        assert_eq!(SensorId::from_str("SENSOR1").unwrap(), SensorId::Sensor1);
        assert!(SensorId::from_str("sensor9").is_err());
    }

    #[test]
    fn test_sensor_numbers_are_sequential() {
        let numbers: Vec<u8> = SensorId::iter().map(SensorId::number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(SensorId::Sensor2.slug(), "sensor2");
    }

    #[test]
    fn test_rgb_packing() {
        assert_eq!(Rgb::WHITE.to_packed(), 0xFF_FF_FF);
        assert_eq!(Rgb::new(0x12, 0x34, 0x56).to_packed(), 0x12_34_56);
    }

    #[test]
    fn test_effective_brightness_is_max_of_requests() {
        let mut segment = LedSegment::new(4, DEFAULT_BASELINE);
        assert_eq!(segment.effective_brightness(DEFAULT_BASELINE), 1);

        segment.requests.insert(SensorId::Sensor1, 40);
        segment.requests.insert(SensorId::Sensor2, 90);
        assert!(segment.recompute(DEFAULT_BASELINE));
        assert_eq!(segment.brightness, 90);

        // No change, no timestamp bump
        assert!(!segment.recompute(DEFAULT_BASELINE));
        assert!(!segment.is_sole_requester(SensorId::Sensor1));

        segment.requests.remove(&SensorId::Sensor2);
        assert!(segment.is_sole_requester(SensorId::Sensor1));
    }
}

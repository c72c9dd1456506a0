//! Proximity event sources.
//!
//! This module contains the sources that can feed proximity events into the
//! coordinator. Each source turns raw readings into [`ProximityEvent`]s once
//! they cross the configured threshold.
//!
//! Current sources:
//! - `poller`: polls [`ProximityReader`]s (hardware drivers, simulation)
//! - `simulation`: random readings for development
//! - `mqtt`: readings published by remote sensor nodes

pub mod mqtt;
pub mod poller;
pub mod simulation;

pub use poller::{ProximityReader, run_poller};
pub use simulation::SimulatedReader;

use crate::state::SensorId;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A reading that crossed the proximity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityEvent {
    pub sensor: SensorId,
    pub raw_value: u32,
    pub timestamp: DateTime<Local>,
}

impl ProximityEvent {
    /// Event stamped with the current local time.
    pub fn new(sensor: SensorId, raw_value: u32) -> Self {
        Self {
            sensor,
            raw_value,
            timestamp: Local::now(),
        }
    }

    /// Build an event only if `raw_value` is strictly above `threshold`.
    pub fn from_reading(sensor: SensorId, raw_value: u32, threshold: u32) -> Option<Self> {
        (raw_value > threshold).then(|| Self::new(sensor, raw_value))
    }
}

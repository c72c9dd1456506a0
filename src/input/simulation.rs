//! Sensor simulation for testing.
//!
//! Provides simulated proximity readings for development without hardware.

use super::ProximityReader;
use crate::error::Result;
use crate::state::SensorId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reader that mostly returns background noise and occasionally a spike,
/// like someone walking past the sensor.
pub struct SimulatedReader {
    sensor: SensorId,
    rng: StdRng,
    /// Chance per read of a spike, in 0.0..=1.0
    spike_probability: f64,
}

impl SimulatedReader {
    const NOISE_MAX: u32 = 2_000;
    const SPIKE_MIN: u32 = 3_500;
    const SPIKE_MAX: u32 = 8_000;

    pub fn new(sensor: SensorId, spike_probability: f64) -> Self {
        Self::with_rng(sensor, spike_probability, StdRng::from_entropy())
    }

    /// Deterministic reader, for tests.
    pub fn seeded(sensor: SensorId, spike_probability: f64, seed: u64) -> Self {
        Self::with_rng(sensor, spike_probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sensor: SensorId, spike_probability: f64, rng: StdRng) -> Self {
        Self {
            sensor,
            rng,
            spike_probability: spike_probability.clamp(0.0, 1.0),
        }
    }
}

impl ProximityReader for SimulatedReader {
    fn sensor(&self) -> SensorId {
        self.sensor
    }

    fn read_proximity(&mut self) -> Result<u32> {
        if self.rng.gen_bool(self.spike_probability) {
            Ok(self.rng.gen_range(Self::SPIKE_MIN..=Self::SPIKE_MAX))
        } else {
            Ok(self.rng.gen_range(0..=Self::NOISE_MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_spikes_at_zero_probability() {
        let mut reader = SimulatedReader::seeded(SensorId::Sensor1, 0.0, 7);
        for _ in 0..200 {
            assert!(reader.read_proximity().unwrap() <= SimulatedReader::NOISE_MAX);
        }
    }

    #[test]
    fn test_always_spikes_at_full_probability() {
        let mut reader = SimulatedReader::seeded(SensorId::Sensor4, 1.5, 7);
        assert_eq!(reader.sensor(), SensorId::Sensor4);
        for _ in 0..200 {
            assert!(reader.read_proximity().unwrap() >= SimulatedReader::SPIKE_MIN);
        }
    }
}

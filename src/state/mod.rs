//! Shared sensor and LED segment state.
//!
//! The [`StateStore`] is the only place segment brightness is mutated. It
//! aggregates per-sensor requests into an effective brightness and tells
//! observers what changed.

pub mod model;
pub mod notifier;
pub mod store;

pub use model::{
    DEFAULT_BASELINE, LedSegment, Rgb, SegmentIndex, SensorActivity, SensorId, SensorState,
};
pub use notifier::{Notifier, Subscription};
pub use store::StateStore;

//! Proximity lighting library.
//!
//! Coordinates LED strip segments shared by several proximity sensors: each
//! sensor ramps its segments up on approach, holds, then lets them decay,
//! while segments shared between sensors stay lit as long as any of them
//! still wants the light.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod sink;
pub mod state;
pub mod supervisor;

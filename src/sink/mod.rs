//! Outbound lighting commands.
//!
//! The coordinator talks to the LED controller only through
//! [`LightingSink`]. How a command reaches the strip (vendor HTTP API, MQTT,
//! serial) is the implementation's business.

mod logging;
mod mqtt;

pub use logging::LoggingSink;
pub use mqtt::MqttSink;

use crate::state::{Rgb, SegmentIndex};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors from delivering a command.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("brightness {0} outside 1..=100")]
    InvalidBrightness(u8),

    #[error("command rejected by controller: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Abstract segment command, serialized as the outbound payload body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SegmentCommand {
    Brightness {
        segments: Vec<SegmentIndex>,
        brightness: u8,
    },
    Color {
        segments: Vec<SegmentIndex>,
        /// Packed `0xRRGGBB`
        rgb: u32,
    },
}

impl SegmentCommand {
    pub fn brightness(segments: &[SegmentIndex], brightness: u8) -> Result<Self, SinkError> {
        if !(1..=100).contains(&brightness) {
            return Err(SinkError::InvalidBrightness(brightness));
        }
        Ok(Self::Brightness {
            segments: segments.to_vec(),
            brightness,
        })
    }

    pub fn color(segments: &[SegmentIndex], color: Rgb) -> Self {
        Self::Color {
            segments: segments.to_vec(),
            rgb: color.to_packed(),
        }
    }
}

impl fmt::Display for SegmentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentCommand::Brightness {
                segments,
                brightness,
            } => write!(f, "brightness {brightness} for {segments:?}"),
            SegmentCommand::Color { segments, rgb } => {
                write!(f, "color #{rgb:06X} for {segments:?}")
            }
        }
    }
}

/// Receiver of segment commands.
#[async_trait]
pub trait LightingSink: Send + Sync {
    async fn set_segment_brightness(
        &self,
        segments: &[SegmentIndex],
        brightness: u8,
    ) -> Result<(), SinkError>;

    async fn set_segment_color(&self, segments: &[SegmentIndex], color: Rgb)
    -> Result<(), SinkError>;
}

use super::{LightingSink, SegmentCommand, SinkError};
use crate::state::{Rgb, SegmentIndex};
use async_trait::async_trait;
use log::info;

/// Sink that only logs commands. Used when no controller is attached.
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl LightingSink for LoggingSink {
    async fn set_segment_brightness(
        &self,
        segments: &[SegmentIndex],
        brightness: u8,
    ) -> Result<(), SinkError> {
        let command = SegmentCommand::brightness(segments, brightness)?;
        info!("[Sink] {}", command);
        Ok(())
    }

    async fn set_segment_color(
        &self,
        segments: &[SegmentIndex],
        color: Rgb,
    ) -> Result<(), SinkError> {
        info!("[Sink] {}", SegmentCommand::color(segments, color));
        Ok(())
    }
}

use thiserror::Error as ThisError;

use crate::sink::SinkError;

#[derive(ThisError, Debug)]
pub enum LightingError {
    #[error("Segment {0} not found")]
    SegmentNotFound(u16),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid proximity payload: {0}")]
    InvalidPayload(String),

    #[error("Lighting sink error: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    MqttClientError(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, LightingError>;

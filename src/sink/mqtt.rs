use super::{LightingSink, SegmentCommand, SinkError};
use crate::state::{Rgb, SegmentIndex};
use async_trait::async_trait;
use log::debug;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use uuid::Uuid;

/// Command as published on the wire, tagged with a request id so the
/// controller bridge can correlate acknowledgements.
#[derive(Debug, Serialize)]
struct CommandEnvelope<'a> {
    request_id: String,
    #[serde(flatten)]
    command: &'a SegmentCommand,
}

/// Sink publishing JSON commands to `<prefix>/set`.
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    pub fn new(client: AsyncClient, prefix: &str) -> Self {
        Self {
            client,
            topic: command_topic(prefix),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, command: &SegmentCommand) -> Result<(), SinkError> {
        let payload = encode(command)?;
        debug!("[Sink] Publishing to {}: {}", self.topic, payload);
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

fn command_topic(prefix: &str) -> String {
    format!("{prefix}/set")
}

fn encode(command: &SegmentCommand) -> Result<String, SinkError> {
    let envelope = CommandEnvelope {
        request_id: Uuid::new_v4().to_string(),
        command,
    };
    Ok(serde_json::to_string(&envelope)?)
}

#[async_trait]
impl LightingSink for MqttSink {
    async fn set_segment_brightness(
        &self,
        segments: &[SegmentIndex],
        brightness: u8,
    ) -> Result<(), SinkError> {
        let command = SegmentCommand::brightness(segments, brightness)?;
        self.publish(&command).await
    }

    async fn set_segment_color(
        &self,
        segments: &[SegmentIndex],
        color: Rgb,
    ) -> Result<(), SinkError> {
        self.publish(&SegmentCommand::color(segments, color)).await
    }
}

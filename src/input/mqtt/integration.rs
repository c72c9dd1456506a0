//! MQTT integration orchestrator.
//!
//! Remote sensor nodes publish raw readings to `<prefix>/<sensor>/proximity`
//! either as a bare integer or as `{"proximity": 4200}`. This module routes
//! those readings through the threshold and into the coordinator's event
//! channel, and hands out a command sink on the same connection.

use super::client::{MqttClient, MqttMessage};
use crate::config::{MqttConfig, SettingsHandle};
use crate::error::{LightingError, Result};
use crate::input::ProximityEvent;
use crate::sink::MqttSink;
use crate::state::{SensorId, StateStore};
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Topic filter matching every sensor's proximity topic.
pub fn proximity_filter(prefix: &str) -> String {
    format!("{prefix}/+/proximity")
}

/// Extract the sensor from `<prefix>/<sensor>/proximity`.
pub fn parse_topic(prefix: &str, topic: &str) -> Result<SensorId> {
    let sensor = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix("/proximity"))
        .ok_or_else(|| LightingError::UnknownSensor(topic.to_string()))?;
    SensorId::from_str(sensor).map_err(|_| LightingError::UnknownSensor(sensor.to_string()))
}

/// Parse a reading payload: a bare integer or `{"proximity": n}`.
pub fn parse_payload(payload: &str) -> Result<u32> {
    #[derive(serde::Deserialize)]
    struct Reading {
        proximity: u32,
    }

    let payload = payload.trim();
    if let Ok(value) = payload.parse::<u32>() {
        return Ok(value);
    }
    serde_json::from_str::<Reading>(payload)
        .map(|reading| reading.proximity)
        .map_err(|e| LightingError::InvalidPayload(format!("{payload:?}: {e}")))
}

/// Routes MQTT readings to proximity events.
pub struct MqttProximityInput {
    prefix: String,
    settings: Arc<SettingsHandle>,
    store: Arc<StateStore>,
}

impl MqttProximityInput {
    pub fn new(prefix: impl Into<String>, settings: Arc<SettingsHandle>, store: Arc<StateStore>) -> Self {
        Self {
            prefix: prefix.into(),
            settings,
            store,
        }
    }

    /// Turn a message into an event if it is a reading above the threshold.
    pub fn process_message(&self, msg: &MqttMessage) -> Option<ProximityEvent> {
        let sensor = match parse_topic(&self.prefix, &msg.topic) {
            Ok(sensor) => sensor,
            Err(e) => {
                debug!("[MQTT] Ignoring message: {}", e);
                return None;
            }
        };

        let raw = match parse_payload(&msg.payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[MQTT] Bad reading from {}: {}", sensor, e);
                return None;
            }
        };

        self.store.update_sensor_connection(sensor, true);
        ProximityEvent::from_reading(sensor, raw, self.settings.get().proximity_threshold)
    }
}

/// Owns the MQTT connection for both directions.
pub struct MqttIntegration {
    config: MqttConfig,
    settings: Arc<SettingsHandle>,
    store: Arc<StateStore>,
}

impl MqttIntegration {
    pub fn new(config: MqttConfig, settings: Arc<SettingsHandle>, store: Arc<StateStore>) -> Self {
        Self {
            config,
            settings,
            store,
        }
    }

    /// Connect, subscribe to proximity topics and forward events to
    /// `events`. Returns the command sink bound to the same connection and
    /// the handle of the background task.
    pub fn start(self, events: mpsc::Sender<ProximityEvent>) -> (MqttSink, JoinHandle<()>) {
        let mqtt_client = MqttClient::new(&self.config);
        let sink = MqttSink::new(mqtt_client.client(), &self.config.topic_prefix);
        let handle = tokio::spawn(async move {
            self.run(mqtt_client, events).await;
        });
        (sink, handle)
    }

    async fn run(self, mqtt_client: MqttClient, events: mpsc::Sender<ProximityEvent>) {
        info!(
            "[MQTT] Connecting to {}:{}",
            self.config.broker_host, self.config.broker_port
        );

        let subscribe_client = mqtt_client.client();
        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);
        let (connected_tx, connected_rx) = oneshot::channel();

        // The event loop has to run before the connection can come up
        let mqtt_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, Some(connected_tx)).await;
        });

        match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => info!("[MQTT] Connection established, subscribing"),
            Ok(Err(_)) => {
                warn!("[MQTT] Connection signal channel dropped");
                return;
            }
            Err(_) => {
                warn!("[MQTT] Connection timeout after 10 seconds");
                mqtt_loop.abort();
                return;
            }
        }

        let filter = proximity_filter(&self.config.topic_prefix);
        if let Err(e) = subscribe_client
            .subscribe(&filter, rumqttc::QoS::AtMostOnce)
            .await
        {
            warn!("[MQTT] Failed to subscribe to {}: {:?}", filter, e);
        }

        let input = MqttProximityInput::new(
            self.config.topic_prefix.clone(),
            self.settings.clone(),
            self.store.clone(),
        );
        while let Some(msg) = msg_rx.recv().await {
            if let Some(event) = input.process_message(&msg)
                && events.send(event).await.is_err()
            {
                info!("[MQTT] Event channel closed, stopping");
                break;
            }
        }

        mqtt_loop.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn input() -> MqttProximityInput {
        MqttProximityInput::new(
            "hall",
            Arc::new(SettingsHandle::new(Settings::default()).unwrap()),
            Arc::new(StateStore::new()),
        )
    }

    fn message(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("hall", "hall/sensor2/proximity").unwrap(), SensorId::Sensor2);
        assert!(parse_topic("hall", "hall/sensor9/proximity").is_err());
        assert!(parse_topic("hall", "hall/sensor2/other").is_err());
        assert!(parse_topic("hall", "kitchen/sensor2/proximity").is_err());
        assert_eq!(proximity_filter("hall"), "hall/+/proximity");
    }

    #[test]
    fn test_parse_payload_formats() {
        assert_eq!(parse_payload(" 4200 ").unwrap(), 4200);
        assert_eq!(parse_payload(r#"{"proximity": 3100}"#).unwrap(), 3100);
        assert!(parse_payload("near").is_err());
    }

    #[test]
    fn test_process_message_applies_threshold() {
        let input = input();
        assert!(input.process_message(&message("hall/sensor1/proximity", "2500")).is_none());

        let event = input
            .process_message(&message("hall/sensor1/proximity", r#"{"proximity":5000}"#))
            .unwrap();
        assert_eq!(event.sensor, SensorId::Sensor1);
        assert_eq!(event.raw_value, 5000);

        assert!(input.process_message(&message("hall/sensor1/proximity", "x")).is_none());
        assert!(input.process_message(&message("other/topic", "9000")).is_none());
    }
}

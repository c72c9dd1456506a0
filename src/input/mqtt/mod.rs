//! MQTT input source for remote proximity sensor nodes.

mod client;
mod integration;

pub use client::{MqttClient, MqttMessage};
pub use integration::{
    MqttIntegration, MqttProximityInput, parse_payload, parse_topic, proximity_filter,
};

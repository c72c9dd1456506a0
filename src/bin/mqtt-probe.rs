//! Test binary for the MQTT side of proximity lighting.
//!
//! Usage:
//!   cargo run --bin mqtt-probe -- sensor1 5000
//!
//! Publishes one proximity reading for the given sensor, then logs every
//! lighting command the coordinator publishes until Ctrl+C.

use clap::Parser;
use log::{info, warn};
use proximity_lighting::config::Config;
use proximity_lighting::input::mqtt::MqttClient;
use proximity_lighting::state::SensorId;
use rumqttc::QoS;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "mqtt-probe")]
#[command(about = "Publish a proximity reading and watch the resulting commands")]
struct Cli {
    /// Sensor to publish for (sensor1..sensor5)
    sensor: SensorId,

    /// Raw proximity value
    #[arg(default_value_t = 5_000)]
    value: u32,
}

#[tokio::main]
async fn main() {
    proximity_lighting::config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("Invalid configuration: {}", e);
            return;
        }
    };
    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let mqtt_client = MqttClient::new(&config.mqtt);
    let async_client = mqtt_client.client();
    let prefix = config.mqtt.topic_prefix.clone();

    let command_topic = format!("{prefix}/set");
    if let Err(e) = mqtt_client.subscribe(&command_topic).await {
        warn!("Failed to subscribe to {}: {}", command_topic, e);
    }

    let (msg_tx, mut msg_rx) = mpsc::channel(100);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(msg_tx, None).await;
    });

    let reading_topic = format!("{}/{}/proximity", prefix, cli.sensor.slug());
    info!("Publishing {} to {}", cli.value, reading_topic);
    if let Err(e) = async_client
        .publish(&reading_topic, QoS::AtLeastOnce, false, cli.value.to_string())
        .await
    {
        warn!("Failed to publish reading: {}", e);
    }

    info!("Listening for lighting commands... Press Ctrl+C to exit.");
    tokio::select! {
        _ = async {
            while let Some(msg) = msg_rx.recv().await {
                info!(">>> {}: {}", msg.topic, msg.payload);
            }
        } => {
            warn!("MQTT message channel ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    mqtt_handle.abort();
}

use clap::Parser;
use log::{debug, error, info};
use proximity_lighting::config::{self, Config, SettingsHandle};
use proximity_lighting::coordinator::EventCoordinator;
use proximity_lighting::input::mqtt::MqttIntegration;
use proximity_lighting::input::{ProximityReader, SimulatedReader, run_poller};
use proximity_lighting::sink::{LightingSink, LoggingSink};
use proximity_lighting::state::{SensorId, StateStore};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "proximity-lighting")]
#[command(about = "Drive LED strip segments from proximity sensors")]
struct Cli {
    /// Use the MQTT broker for sensor readings and lighting commands
    #[arg(long, env = "PROXIMITY_MQTT")]
    mqtt: bool,

    /// Poll simulated sensors, spiking with this probability per read
    #[arg(long, env = "PROXIMITY_SIMULATE")]
    simulate: Option<f64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();
    let cli = Cli::parse();
    info!("Starting proximity lighting");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded:");
    info!("  Threshold: {}", config.lighting.proximity_threshold);
    info!(
        "  Ramp: {:?} in {} step(s), hold: {:?}",
        config.lighting.ramp_duration, config.lighting.steps, config.lighting.hold_duration
    );
    info!(
        "  Brightness: {}..={}",
        config.lighting.min_brightness, config.lighting.max_brightness
    );

    let settings = match SettingsHandle::new(config.lighting.clone()) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            error!("Invalid lighting settings: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(StateStore::with_baseline(config.lighting.min_brightness));
    let (event_tx, event_rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();

    let _segment_log = store.on_segment_changed({
        let store = store.clone();
        move |index| {
            if let Ok(segment) = store.segment_state(*index) {
                debug!("Segment {} -> {}", index, segment.brightness);
            }
        }
    });

    let mut mqtt_task = None;
    let sink: Arc<dyn LightingSink> = if cli.mqtt {
        let integration = MqttIntegration::new(config.mqtt.clone(), settings.clone(), store.clone());
        let (sink, handle) = integration.start(event_tx.clone());
        info!("  Commands published to {}", sink.topic());
        mqtt_task = Some(handle);
        Arc::new(sink)
    } else {
        info!("  No controller attached, logging commands");
        Arc::new(LoggingSink)
    };

    let poller = cli.simulate.map(|probability| {
        info!("  Simulating sensors (spike probability {})", probability);
        let readers: Vec<Box<dyn ProximityReader>> = SensorId::iter()
            .map(|sensor| Box::new(SimulatedReader::new(sensor, probability)) as Box<dyn ProximityReader>)
            .collect();
        run_poller(
            readers,
            settings.clone(),
            store.clone(),
            event_tx.clone(),
            shutdown.clone(),
        )
    });
    drop(event_tx);

    let coordinator = EventCoordinator::new(store.clone(), sink, settings.clone());
    let coordinator_task = tokio::spawn(coordinator.run(event_rx, shutdown.clone()));

    info!("Proximity lighting is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown.cancel();
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    if let Some(mqtt_task) = mqtt_task {
        mqtt_task.abort();
    }
    if let Err(e) = coordinator_task.await {
        error!("Coordinator task failed: {}", e);
    }

    info!("Proximity lighting stopped");
}

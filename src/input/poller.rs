//! Periodic polling of proximity readers.

use super::ProximityEvent;
use crate::config::SettingsHandle;
use crate::error::Result;
use crate::state::{SensorId, StateStore};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A source of raw proximity readings for one sensor.
///
/// Implemented by hardware drivers (e.g. an I2C proximity chip) and by
/// [`SimulatedReader`](super::SimulatedReader). Reads are expected to be
/// quick; the poller calls them inline.
pub trait ProximityReader: Send {
    fn sensor(&self) -> SensorId;

    fn read_proximity(&mut self) -> Result<u32>;
}

/// Spawn a task that reads every reader once per poll interval and sends
/// an event for each reading above the threshold.
///
/// A failed read marks the sensor disconnected in the store; the next
/// successful read marks it connected again. The task ends when `shutdown`
/// is cancelled or the event channel closes.
pub fn run_poller(
    mut readers: Vec<Box<dyn ProximityReader>>,
    settings: Arc<SettingsHandle>,
    store: Arc<StateStore>,
    events: mpsc::Sender<ProximityEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[Poller] Polling {} proximity reader(s)", readers.len());
        loop {
            let current = settings.get();

            for reader in readers.iter_mut() {
                let sensor = reader.sensor();
                match reader.read_proximity() {
                    Ok(raw) => {
                        store.update_sensor_connection(sensor, true);
                        let Some(event) =
                            ProximityEvent::from_reading(sensor, raw, current.proximity_threshold)
                        else {
                            continue;
                        };
                        debug!("[Poller] {} reading {} above threshold", sensor, raw);
                        if events.send(event).await.is_err() {
                            info!("[Poller] Event channel closed, stopping");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("[Poller] Failed to read {}: {}", sensor, e);
                        store.update_sensor_connection(sensor, false);
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("[Poller] Shutting down");
                    return;
                }
                _ = tokio::time::sleep(current.sensor_poll_delay) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::LightingError;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedReader {
        sensor: SensorId,
        readings: VecDeque<Option<u32>>,
    }

    impl ProximityReader for ScriptedReader {
        fn sensor(&self) -> SensorId {
            self.sensor
        }

        fn read_proximity(&mut self) -> Result<u32> {
            match self.readings.pop_front().flatten() {
                Some(value) => Ok(value),
                None => Err(LightingError::InvalidPayload("bus error".to_string())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_emits_only_readings_above_threshold() {
        let settings = Arc::new(
            SettingsHandle::new(Settings {
                sensor_poll_delay: Duration::from_millis(100),
                ..Settings::default()
            })
            .unwrap(),
        );
        let store = Arc::new(StateStore::new());
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let reader = ScriptedReader {
            sensor: SensorId::Sensor2,
            readings: VecDeque::from(vec![Some(100), Some(5000), None, Some(3001)]),
        };
        let handle = run_poller(
            vec![Box::new(reader)],
            settings,
            store.clone(),
            tx,
            shutdown.clone(),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!((first.sensor, first.raw_value), (SensorId::Sensor2, 5000));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!store.sensor_state(SensorId::Sensor2).is_connected);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.raw_value, 3001);
        assert!(store.sensor_state(SensorId::Sensor2).is_connected);

        shutdown.cancel();
        handle.await.unwrap();
    }
}

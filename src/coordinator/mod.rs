//! Per-sensor ramp, hold and decay lifecycles.
//!
//! Each sensor runs its own lifecycle, serialized by a per-sensor lock:
//!
//! ```text
//! Idle -> Increasing -> Holding -> Decreasing -> Idle
//!            ^------------- new event ------------'
//! ```
//!
//! A new event cancels the sensor's outstanding hold/decay and starts over.
//! The ramp itself is never interrupted, so segments always converge before
//! anything else happens to them. Segments shared with other sensors are only
//! driven down once no other sensor requests them.

mod cancel;
mod ramp;

pub use cancel::CancelSlot;
pub use ramp::RampPlan;

use crate::config::{SegmentMapping, Settings, SettingsHandle};
use crate::error::Result;
use crate::input::ProximityEvent;
use crate::sink::LightingSink;
use crate::state::{Rgb, SegmentIndex, SensorActivity, SensorId, StateStore};
use crate::supervisor::TaskSupervisor;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// How a lifecycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ramp, hold and decay all ran.
    Completed,
    /// A newer event for the same sensor took over.
    Preempted,
    /// The sensor controls no segments.
    Skipped,
}

/// Execution state private to one sensor.
#[derive(Default)]
struct SensorRuntime {
    lock: Mutex<()>,
    cancel: CancelSlot,
}

/// Drives sensor lifecycles from proximity events.
pub struct EventCoordinator {
    store: Arc<StateStore>,
    sink: Arc<dyn LightingSink>,
    settings: Arc<SettingsHandle>,
    runtimes: BTreeMap<SensorId, SensorRuntime>,
    supervisor: TaskSupervisor,
}

impl EventCoordinator {
    /// Create a coordinator and apply the current segment mapping.
    pub fn new(
        store: Arc<StateStore>,
        sink: Arc<dyn LightingSink>,
        settings: Arc<SettingsHandle>,
    ) -> Arc<Self> {
        let coordinator = Self {
            store,
            sink,
            settings,
            runtimes: SensorId::iter()
                .map(|sensor| (sensor, SensorRuntime::default()))
                .collect(),
            supervisor: TaskSupervisor::new(),
        };
        let settings = coordinator.settings.get();
        coordinator.store.set_baseline(settings.min_brightness);
        coordinator.apply_segment_mapping(&settings.segment_mapping);
        Arc::new(coordinator)
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    fn runtime(&self, sensor: SensorId) -> &SensorRuntime {
        // Built from SensorId::iter(), so every sensor has an entry
        &self.runtimes[&sensor]
    }

    /// Reconfigure every sensor whose segments differ from `mapping`.
    /// Returns the sensors that were reconfigured.
    pub fn apply_segment_mapping(&self, mapping: &SegmentMapping) -> Vec<SensorId> {
        let mut reconfigured = Vec::new();
        for sensor in SensorId::iter() {
            let wanted = mapping.segments(sensor);
            if self.store.segments_controlled_by(sensor) == wanted {
                continue;
            }
            info!("[Coordinator] {} now controls segments {:?}", sensor, wanted);
            self.store.configure_sensor_segments(sensor, wanted);
            reconfigured.push(sensor);
        }
        reconfigured
    }

    /// Handle `event` on a supervised background task.
    pub fn dispatch(self: &Arc<Self>, event: ProximityEvent) {
        let this = Arc::clone(self);
        let name = format!("{} event", event.sensor);
        self.supervisor.spawn(name, async move {
            this.handle_event(event).await;
            Ok(())
        });
    }

    /// Run one sensor lifecycle for `event` to completion or preemption.
    ///
    /// Errors are logged here and never propagate.
    pub async fn handle_event(&self, event: ProximityEvent) -> Option<Outcome> {
        let sensor = event.sensor;
        match self.run_lifecycle(&event).await {
            Ok(outcome) => {
                debug!("[Coordinator] {} lifecycle ended: {:?}", sensor, outcome);
                Some(outcome)
            }
            Err(e) => {
                error!("[Coordinator] Error handling event for {}: {}", sensor, e);
                None
            }
        }
    }

    async fn run_lifecycle(&self, event: &ProximityEvent) -> Result<Outcome> {
        let sensor = event.sensor;
        let runtime = self.runtime(sensor);

        self.store.record_event(event);
        let token = runtime.cancel.renew();

        let guard = runtime.lock.lock().await;
        if token.is_cancelled() {
            // A newer event queued behind us will do the work
            debug!("[Coordinator] {}: superseded before ramp", sensor);
            return Ok(Outcome::Preempted);
        }

        let settings = self.settings.get();
        self.sync_baseline(settings.min_brightness).await;
        let segments = self.store.segments_controlled_by(sensor);
        if segments.is_empty() {
            info!("[Coordinator] No segments configured for {}", sensor);
            return Ok(Outcome::Skipped);
        }

        if self.at_max(sensor, &segments, settings.max_brightness) {
            debug!("[Coordinator] {}: segments already at max, skipping ramp", sensor);
        } else {
            self.ramp(sensor, &segments, &settings, &token).await?;
        }
        // Segments skipped by the ramp may have dropped meanwhile
        let changed = self
            .store
            .set_brightness_for_sensor(sensor, &segments, settings.max_brightness);
        self.push_segments(sensor, &changed).await;
        self.store
            .update_sensor_activity(sensor, settings.max_brightness, SensorActivity::Holding);
        drop(guard);

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("[Coordinator] {}: hold timer reset", sensor);
                return Ok(Outcome::Preempted);
            }
            _ = tokio::time::sleep(settings.hold_duration) => {}
        }

        let _guard = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("[Coordinator] {}: decay cancelled", sensor);
                return Ok(Outcome::Preempted);
            }
            guard = runtime.lock.lock() => guard,
        };
        if token.is_cancelled() {
            debug!("[Coordinator] {}: decay cancelled", sensor);
            return Ok(Outcome::Preempted);
        }

        self.decay(sensor, &self.settings.get()).await;
        Ok(Outcome::Completed)
    }

    /// True when every segment already carries this sensor's max request.
    fn at_max(&self, sensor: SensorId, segments: &[SegmentIndex], max: u8) -> bool {
        segments.iter().all(|index| {
            self.store
                .segment_state(*index)
                .is_ok_and(|segment| segment.requests.get(&sensor) == Some(&max))
        })
    }

    async fn ramp(
        &self,
        sensor: SensorId,
        segments: &[SegmentIndex],
        settings: &Settings,
        token: &CancellationToken,
    ) -> Result<()> {
        // Leave segments another sensor is ramping (or already holds at
        // max) alone; stepping them from below would dim them
        let claimed = self.store.segments_claimed_by_increasing(sensor);
        let mut working = Vec::with_capacity(segments.len());
        let mut lit = Vec::new();
        let mut start = settings.max_brightness;
        for index in segments {
            if claimed.contains(index) {
                continue;
            }
            let brightness = self.store.segment_state(*index)?.brightness;
            if brightness >= settings.max_brightness {
                lit.push(*index);
                continue;
            }
            start = start.min(brightness);
            working.push(*index);
        }

        // Claim lit segments now so a sensor releasing them meanwhile sees us
        let changed = self
            .store
            .set_brightness_for_sensor(sensor, &lit, settings.max_brightness);
        self.push_segments(sensor, &changed).await;

        if working.is_empty() {
            debug!(
                "[Coordinator] {}: segments already lit or ramping elsewhere",
                sensor
            );
            return Ok(());
        }

        self.store
            .update_sensor_activity(sensor, start, SensorActivity::Increasing);

        let plan = RampPlan::new(
            start,
            settings.max_brightness,
            settings.steps,
            settings.min_brightness,
            settings.max_brightness,
        );
        let delay = settings.step_delay();
        info!(
            "[Coordinator] {}: ramping {:?} from {} to {} in {} step(s)",
            sensor,
            working,
            start,
            settings.max_brightness,
            plan.steps()
        );

        let mut preempted = false;
        for (step, value) in (1..).zip(plan.values()) {
            if !preempted && token.is_cancelled() {
                preempted = true;
                debug!("[Coordinator] {}: new event during ramp, finishing ramp first", sensor);
            }

            self.store.set_brightness_for_sensor(sensor, &working, value);
            self.store
                .update_sensor_activity(sensor, value, SensorActivity::Increasing);
            self.send_brightness(sensor, &working, value).await;

            if step < plan.steps() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn decay(&self, sensor: SensorId, settings: &Settings) {
        self.sync_baseline(settings.min_brightness).await;
        let segments = self.store.segments_controlled_by(sensor);
        let sole = self.store.release_shared_requests(sensor, &segments);

        if sole.is_empty() {
            debug!(
                "[Coordinator] {}: every segment still requested elsewhere, going idle",
                sensor
            );
            self.store
                .update_sensor_activity(sensor, settings.min_brightness, SensorActivity::Idle);
            self.store.clear_request_for_sensor(sensor, &segments);
            return;
        }

        info!("[Coordinator] {}: decaying {:?}", sensor, sole);
        self.store
            .update_sensor_activity(sensor, settings.max_brightness, SensorActivity::Decreasing);
        self.send_brightness(sensor, &sole, settings.min_brightness)
            .await;
        self.store.clear_request_for_sensor(sensor, &sole);
        self.store
            .update_sensor_activity(sensor, settings.min_brightness, SensorActivity::Idle);
    }

    /// Send the store's current brightness for `segments`, one command per
    /// distinct value.
    async fn push_segments(&self, sensor: SensorId, segments: &[SegmentIndex]) {
        let mut by_value: BTreeMap<u8, Vec<SegmentIndex>> = BTreeMap::new();
        for index in segments {
            if let Ok(segment) = self.store.segment_state(*index) {
                by_value.entry(segment.brightness).or_default().push(*index);
            }
        }
        for (value, group) in by_value {
            self.send_brightness(sensor, &group, value).await;
        }
    }

    /// Move the store baseline to `baseline` and bring every unrequested
    /// segment along.
    async fn sync_baseline(&self, baseline: u8) {
        let changed = self.store.set_baseline(baseline);
        if changed.is_empty() {
            return;
        }
        info!(
            "[Coordinator] Baseline now {}, resetting {:?}",
            baseline, changed
        );
        if let Err(e) = self.sink.set_segment_brightness(&changed, baseline).await {
            warn!(
                "[Coordinator] Failed to reset {:?} to {}: {}",
                changed, baseline, e
            );
        }
    }

    async fn send_brightness(&self, sensor: SensorId, segments: &[SegmentIndex], value: u8) {
        if let Err(e) = self.sink.set_segment_brightness(segments, value).await {
            warn!(
                "[Coordinator] {}: failed to set {:?} to {}: {}",
                sensor, segments, value, e
            );
        }
    }

    /// Set a color on `segments`, skipping the command when every segment
    /// already shows it. Returns whether a command was sent.
    pub async fn set_segment_color(&self, segments: &[SegmentIndex], color: Rgb) -> Result<bool> {
        let unchanged = segments.iter().all(|index| {
            self.store
                .segment_state(*index)
                .is_ok_and(|segment| segment.color == color)
        });
        if unchanged {
            debug!("[Coordinator] Color unchanged for {:?}, skipping", segments);
            return Ok(false);
        }

        self.sink.set_segment_color(segments, color).await?;
        self.store.update_segment_color(segments, color);
        Ok(true)
    }

    /// Consume events and settings changes until `shutdown` fires or the
    /// event channel closes, then wait for in-flight lifecycles.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ProximityEvent>,
        shutdown: CancellationToken,
    ) {
        let mut settings_rx = self.settings.subscribe();
        info!("[Coordinator] Running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Ok(()) = settings_rx.changed() => {
                    let settings = settings_rx.borrow_and_update().clone();
                    self.apply_segment_mapping(&settings.segment_mapping);
                    self.sync_baseline(settings.min_brightness).await;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        info!("[Coordinator] Event channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Cancel pending holds and wait for running lifecycles to finish.
    pub async fn shutdown(&self) {
        for runtime in self.runtimes.values() {
            runtime.cancel.cancel();
        }
        self.supervisor.shutdown().await;
        info!("[Coordinator] Stopped");
    }
}

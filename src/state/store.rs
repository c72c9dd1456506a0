//! Authoritative sensor and segment state.
//!
//! Every mutation runs inside one short `parking_lot` critical section. The
//! set of changed sensors/segments is collected while the lock is held and
//! published through the notifiers only after it is released, so observers
//! can call back into the store freely.

use super::model::{
    DEFAULT_BASELINE, LedSegment, Rgb, SegmentIndex, SensorActivity, SensorId, SensorState,
};
use super::notifier::{Notifier, Subscription};
use crate::error::{LightingError, Result};
use crate::input::ProximityEvent;
use chrono::Local;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;

struct Inner {
    baseline: u8,
    sensors: BTreeMap<SensorId, SensorState>,
    segments: BTreeMap<SegmentIndex, LedSegment>,
}

impl Inner {
    fn sensor_mut(&mut self, sensor: SensorId) -> &mut SensorState {
        let baseline = self.baseline;
        self.sensors
            .entry(sensor)
            .or_insert_with(|| SensorState::new(sensor, baseline))
    }

    fn segment_mut(&mut self, index: SegmentIndex) -> &mut LedSegment {
        let baseline = self.baseline;
        self.segments
            .entry(index)
            .or_insert_with(|| LedSegment::new(index, baseline))
    }
}

/// Shared state for all sensors and LED segments.
///
/// Sensor entries exist for the whole fixed sensor set from construction.
/// Segment entries are created lazily on write paths (configuration or a
/// brightness request) and are never removed.
pub struct StateStore {
    inner: Mutex<Inner>,
    sensor_changed: Notifier<SensorId>,
    segment_changed: Notifier<SegmentIndex>,
}

impl StateStore {
    /// Create a store with the default baseline brightness.
    pub fn new() -> Self {
        Self::with_baseline(DEFAULT_BASELINE)
    }

    /// Create a store whose unrequested segments sit at `baseline`.
    pub fn with_baseline(baseline: u8) -> Self {
        let sensors = SensorId::iter()
            .map(|sensor| (sensor, SensorState::new(sensor, baseline)))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                baseline,
                sensors,
                segments: BTreeMap::new(),
            }),
            sensor_changed: Notifier::new(),
            segment_changed: Notifier::new(),
        }
    }

    pub fn baseline(&self) -> u8 {
        self.inner.lock().baseline
    }

    /// Move the baseline and re-settle every segment without requests.
    ///
    /// Idle sensors follow the new baseline too. Returns the segments whose
    /// effective brightness changed.
    pub fn set_baseline(&self, baseline: u8) -> Vec<SegmentIndex> {
        let mut changed = Vec::new();
        let mut idle = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.baseline == baseline {
                return changed;
            }
            inner.baseline = baseline;

            for segment in inner.segments.values_mut() {
                if segment.recompute(baseline) {
                    changed.push(segment.index);
                }
            }
            for state in inner.sensors.values_mut() {
                if state.activity == SensorActivity::Idle && state.current_brightness != baseline {
                    state.current_brightness = baseline;
                    idle.push(state.sensor);
                }
            }
        }

        debug!("[Store] Baseline now {}", baseline);
        for sensor in &idle {
            self.sensor_changed.notify(sensor);
        }
        self.notify_segments(&changed);
        changed
    }

    /// Register an observer for sensor changes.
    pub fn on_sensor_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SensorId) + Send + Sync + 'static,
    {
        self.sensor_changed.subscribe(callback)
    }

    /// Register an observer for segment changes.
    pub fn on_segment_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SegmentIndex) + Send + Sync + 'static,
    {
        self.segment_changed.subscribe(callback)
    }

    pub fn sensor_state(&self, sensor: SensorId) -> SensorState {
        self.inner.lock().sensor_mut(sensor).clone()
    }

    pub fn sensors(&self) -> Vec<SensorState> {
        self.inner.lock().sensors.values().cloned().collect()
    }

    /// Strict read: fails if the segment was never configured or written.
    pub fn segment_state(&self, index: SegmentIndex) -> Result<LedSegment> {
        self.inner
            .lock()
            .segments
            .get(&index)
            .cloned()
            .ok_or(LightingError::SegmentNotFound(index))
    }

    /// Lenient read: creates a default segment if it does not exist yet.
    pub fn segment_state_or_default(&self, index: SegmentIndex) -> LedSegment {
        self.inner.lock().segment_mut(index).clone()
    }

    pub fn segments(&self) -> Vec<LedSegment> {
        self.inner.lock().segments.values().cloned().collect()
    }

    pub fn segments_controlled_by(&self, sensor: SensorId) -> Vec<SegmentIndex> {
        self.inner.lock().sensor_mut(sensor).controlled_segments.clone()
    }

    pub fn sensors_controlling(&self, index: SegmentIndex) -> Vec<SensorId> {
        self.inner
            .lock()
            .segments
            .get(&index)
            .map(|segment| segment.controlling_sensors.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replace the set of segments `sensor` controls.
    ///
    /// Segments leaving the set lose the sensor's request and controller
    /// entry; segments joining it only gain the controller entry. Returns the
    /// segments whose effective brightness changed.
    pub fn configure_sensor_segments(
        &self,
        sensor: SensorId,
        segments: &[SegmentIndex],
    ) -> Vec<SegmentIndex> {
        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock();
            let baseline = inner.baseline;
            let previous = std::mem::replace(
                &mut inner.sensor_mut(sensor).controlled_segments,
                segments.to_vec(),
            );

            for index in previous.iter().filter(|index| !segments.contains(*index)) {
                if let Some(segment) = inner.segments.get_mut(index) {
                    segment.controlling_sensors.remove(&sensor);
                    segment.requests.remove(&sensor);
                    if segment.recompute(baseline) {
                        changed.push(*index);
                    }
                }
            }

            for index in segments {
                inner.segment_mut(*index).controlling_sensors.insert(sensor);
            }
        }

        debug!("[Store] {} now controls {:?}", sensor, segments);
        self.sensor_changed.notify(&sensor);
        self.notify_segments(&changed);
        changed
    }

    /// Record `brightness` as `sensor`'s request on each segment.
    ///
    /// Returns (and notifies) only the segments whose effective brightness
    /// changed.
    pub fn set_brightness_for_sensor(
        &self,
        sensor: SensorId,
        segments: &[SegmentIndex],
        brightness: u8,
    ) -> Vec<SegmentIndex> {
        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock();
            let baseline = inner.baseline;
            for index in segments {
                let segment = inner.segment_mut(*index);
                segment.requests.insert(sensor, brightness);
                if segment.recompute(baseline) {
                    changed.push(*index);
                }
            }
        }

        self.notify_segments(&changed);
        changed
    }

    /// Drop `sensor`'s request on each segment, falling back to the remaining
    /// requesters or the baseline.
    pub fn clear_request_for_sensor(
        &self,
        sensor: SensorId,
        segments: &[SegmentIndex],
    ) -> Vec<SegmentIndex> {
        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock();
            let baseline = inner.baseline;
            for index in segments {
                if let Some(segment) = inner.segments.get_mut(index) {
                    segment.requests.remove(&sensor);
                    if segment.recompute(baseline) {
                        changed.push(*index);
                    }
                }
            }
        }

        self.notify_segments(&changed);
        changed
    }

    /// Record what the sensor itself believes it is doing. Observers only;
    /// segment aggregation never reads this.
    pub fn update_sensor_activity(&self, sensor: SensorId, brightness: u8, activity: SensorActivity) {
        {
            let mut inner = self.inner.lock();
            let state = inner.sensor_mut(sensor);
            state.current_brightness = brightness;
            state.activity = activity;
            state.last_activity = Some(Local::now());
        }
        self.sensor_changed.notify(&sensor);
    }

    /// Remember an incoming proximity event for observers.
    pub fn record_event(&self, event: &ProximityEvent) {
        {
            let mut inner = self.inner.lock();
            let state = inner.sensor_mut(event.sensor);
            state.last_event = Some(event.clone());
            state.event_count += 1;
            state.last_activity = Some(event.timestamp);
        }
        self.sensor_changed.notify(&event.sensor);
    }

    pub fn update_sensor_connection(&self, sensor: SensorId, is_connected: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            let state = inner.sensor_mut(sensor);
            let changed = state.is_connected != is_connected;
            state.is_connected = is_connected;
            changed
        };
        if changed {
            self.sensor_changed.notify(&sensor);
        }
    }

    /// Set the color of each existing segment. Unknown segments are skipped.
    pub fn update_segment_color(&self, segments: &[SegmentIndex], color: Rgb) {
        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock();
            for index in segments {
                if let Some(segment) = inner.segments.get_mut(index) {
                    segment.color = color;
                    segment.last_update = Some(Local::now());
                    changed.push(*index);
                }
            }
        }
        self.notify_segments(&changed);
    }

    /// Segments controlled by any sensor other than `except` that is
    /// currently ramping up.
    pub fn segments_claimed_by_increasing(&self, except: SensorId) -> BTreeSet<SegmentIndex> {
        self.inner
            .lock()
            .sensors
            .values()
            .filter(|state| state.sensor != except && state.activity == SensorActivity::Increasing)
            .flat_map(|state| state.controlled_segments.iter().copied())
            .collect()
    }

    /// Split `segments` by whether `sensor` is their only requester.
    ///
    /// Where other sensors still hold requests, `sensor`'s request is dropped
    /// right away (the aggregate falls back to theirs). Segments where
    /// `sensor` is the sole requester are returned untouched so the caller
    /// can drive them down before clearing.
    pub fn release_shared_requests(
        &self,
        sensor: SensorId,
        segments: &[SegmentIndex],
    ) -> Vec<SegmentIndex> {
        let mut sole = Vec::new();
        let mut changed = Vec::new();
        {
            let mut inner = self.inner.lock();
            let baseline = inner.baseline;
            for index in segments {
                let Some(segment) = inner.segments.get_mut(index) else {
                    continue;
                };
                if segment.is_sole_requester(sensor) {
                    sole.push(*index);
                } else if segment.requests.remove(&sensor).is_some() && segment.recompute(baseline) {
                    changed.push(*index);
                }
            }
        }

        self.notify_segments(&changed);
        sole
    }

    fn notify_segments(&self, segments: &[SegmentIndex]) {
        for index in segments {
            self.segment_changed.notify(index);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn brightness(store: &StateStore, index: SegmentIndex) -> u8 {
        store.segment_state(index).unwrap().brightness
    }

    #[test]
    fn test_sensors_exist_from_start() {
        let store = StateStore::new();
        let sensors = store.sensors();
        assert_eq!(sensors.len(), 5);
        assert!(sensors.iter().all(|s| s.activity == SensorActivity::Idle));
    }

    #[test]
    fn test_strict_read_fails_for_unknown_segment() {
        let store = StateStore::new();
        assert!(matches!(
            store.segment_state(7),
            Err(LightingError::SegmentNotFound(7))
        ));

        let segment = store.segment_state_or_default(7);
        assert_eq!(segment.brightness, DEFAULT_BASELINE);
        assert!(store.segment_state(7).is_ok());
    }

    #[test]
    fn test_effective_brightness_is_max_of_requests() {
        let store = StateStore::new();
        store.set_brightness_for_sensor(SensorId::Sensor1, &[0, 1], 40);
        store.set_brightness_for_sensor(SensorId::Sensor2, &[1, 2], 80);

        assert_eq!(brightness(&store, 0), 40);
        assert_eq!(brightness(&store, 1), 80);
        assert_eq!(brightness(&store, 2), 80);

        store.clear_request_for_sensor(SensorId::Sensor2, &[1, 2]);
        assert_eq!(brightness(&store, 1), 40);
        assert_eq!(brightness(&store, 2), DEFAULT_BASELINE);
    }

    #[test]
    fn test_only_changed_segments_are_reported() {
        let store = StateStore::new();
        store.set_brightness_for_sensor(SensorId::Sensor1, &[0, 1], 100);

        // Segment 0 already at 100 via Sensor1; segment 5 is new
        let changed = store.set_brightness_for_sensor(SensorId::Sensor2, &[0, 5], 100);
        assert_eq!(changed, vec![5]);

        // Lower request under a higher one changes nothing
        let changed = store.set_brightness_for_sensor(SensorId::Sensor3, &[0], 20);
        assert!(changed.is_empty());

        let changed = store.clear_request_for_sensor(SensorId::Sensor1, &[0, 1]);
        assert_eq!(changed, vec![1]);
    }

    #[test]
    fn test_invariant_holds_for_mixed_sequences() {
        let store = StateStore::new();
        let ops: &[(SensorId, &[SegmentIndex], Option<u8>)] = &[
            (SensorId::Sensor1, &[0, 1, 2], Some(30)),
            (SensorId::Sensor2, &[2, 3], Some(70)),
            (SensorId::Sensor3, &[0, 3], Some(50)),
            (SensorId::Sensor2, &[2], None),
            (SensorId::Sensor1, &[0, 1, 2], Some(100)),
            (SensorId::Sensor3, &[0, 3], None),
            (SensorId::Sensor1, &[1], None),
            (SensorId::Sensor4, &[9], None),
        ];

        for (sensor, segments, value) in ops {
            match value {
                Some(b) => store.set_brightness_for_sensor(*sensor, segments, *b),
                None => store.clear_request_for_sensor(*sensor, segments),
            };
            for segment in store.segments() {
                let expected = segment
                    .requests
                    .values()
                    .copied()
                    .max()
                    .unwrap_or(store.baseline());
                assert_eq!(segment.brightness, expected, "segment {}", segment.index);
            }
        }
    }

    #[test]
    fn test_configure_drops_stale_requests_and_leaves_new_segments_untouched() {
        let store = StateStore::new();
        store.configure_sensor_segments(SensorId::Sensor1, &[0, 1, 2]);
        store.configure_sensor_segments(SensorId::Sensor2, &[2]);
        store.set_brightness_for_sensor(SensorId::Sensor1, &[0, 1, 2], 100);
        store.set_brightness_for_sensor(SensorId::Sensor2, &[2], 60);

        let changed = store.configure_sensor_segments(SensorId::Sensor1, &[0, 1, 5]);
        assert_eq!(changed, vec![2]);

        let seg2 = store.segment_state(2).unwrap();
        assert_eq!(seg2.brightness, 60);
        assert!(!seg2.requests.contains_key(&SensorId::Sensor1));
        assert!(!seg2.controlling_sensors.contains(&SensorId::Sensor1));

        let seg5 = store.segment_state(5).unwrap();
        assert!(seg5.controlling_sensors.contains(&SensorId::Sensor1));
        assert!(seg5.requests.is_empty());
        assert_eq!(seg5.brightness, DEFAULT_BASELINE);

        assert_eq!(store.segments_controlled_by(SensorId::Sensor1), vec![0, 1, 5]);
        assert_eq!(store.sensors_controlling(2), vec![SensorId::Sensor2]);
    }

    #[test]
    fn test_release_shared_requests_partitions_segments() {
        let store = StateStore::new();
        store.set_brightness_for_sensor(SensorId::Sensor1, &[0, 1], 100);
        store.set_brightness_for_sensor(SensorId::Sensor2, &[1], 100);

        let sole = store.release_shared_requests(SensorId::Sensor1, &[0, 1, 8]);
        assert_eq!(sole, vec![0]);

        let seg1 = store.segment_state(1).unwrap();
        assert_eq!(seg1.brightness, 100);
        assert!(!seg1.requests.contains_key(&SensorId::Sensor1));
        // Sole segment keeps its request until the caller clears it
        assert_eq!(store.segment_state(0).unwrap().requests.len(), 1);
    }

    #[test]
    fn test_segments_claimed_by_increasing_excludes_self() {
        let store = StateStore::new();
        store.configure_sensor_segments(SensorId::Sensor1, &[0, 1]);
        store.configure_sensor_segments(SensorId::Sensor2, &[1, 2]);
        store.update_sensor_activity(SensorId::Sensor2, 50, SensorActivity::Increasing);
        store.update_sensor_activity(SensorId::Sensor1, 50, SensorActivity::Increasing);

        let claimed = store.segments_claimed_by_increasing(SensorId::Sensor1);
        assert_eq!(claimed.into_iter().collect::<Vec<_>>(), vec![1, 2]);

        store.update_sensor_activity(SensorId::Sensor2, 100, SensorActivity::Holding);
        assert!(store.segments_claimed_by_increasing(SensorId::Sensor1).is_empty());
    }

    #[test]
    fn test_notifications_fire_after_lock_release() {
        let store = Arc::new(StateStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = store.clone();
        let log = seen.clone();
        let _subscription = store.on_segment_changed(move |index| {
            // Reading back inside the callback would deadlock if the lock were held
            let segment = reader.segment_state(*index).unwrap();
            log.lock().push((*index, segment.brightness));
        });

        store.set_brightness_for_sensor(SensorId::Sensor1, &[3, 4], 90);
        store.set_brightness_for_sensor(SensorId::Sensor1, &[3], 90);
        assert_eq!(*seen.lock(), vec![(3, 90), (4, 90)]);
    }

    #[test]
    fn test_sensor_notifications_and_event_bookkeeping() {
        let store = StateStore::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let log = hits.clone();
        let _subscription = store.on_sensor_changed(move |sensor| log.lock().push(*sensor));

        store.update_sensor_activity(SensorId::Sensor3, 100, SensorActivity::Holding);
        store.record_event(&ProximityEvent::new(SensorId::Sensor3, 4200));
        store.update_sensor_connection(SensorId::Sensor3, false);
        store.update_sensor_connection(SensorId::Sensor3, false);

        let state = store.sensor_state(SensorId::Sensor3);
        assert_eq!(state.activity, SensorActivity::Holding);
        assert_eq!(state.current_brightness, 100);
        assert_eq!(state.event_count, 1);
        assert_eq!(state.last_event.map(|e| e.raw_value), Some(4200));
        assert!(!state.is_connected);
        assert_eq!(hits.lock().len(), 3);
    }

    #[test]
    fn test_update_segment_color_skips_unknown_segments() {
        let store = StateStore::new();
        store.configure_sensor_segments(SensorId::Sensor1, &[0]);
        store.update_segment_color(&[0, 42], Rgb::new(10, 20, 30));

        assert_eq!(store.segment_state(0).unwrap().color, Rgb::new(10, 20, 30));
        assert!(store.segment_state(42).is_err());
    }

    #[test]
    fn test_sensors_start_at_store_baseline() {
        let store = StateStore::with_baseline(12);
        assert!(store.sensors().iter().all(|s| s.current_brightness == 12));
        assert_eq!(store.segment_state_or_default(3).brightness, 12);
    }

    #[test]
    fn test_set_baseline_resettles_unrequested_segments() {
        let store = StateStore::new();
        store.configure_sensor_segments(SensorId::Sensor1, &[0, 1]);
        store.set_brightness_for_sensor(SensorId::Sensor1, &[1], 100);
        store.update_sensor_activity(SensorId::Sensor1, 100, SensorActivity::Holding);

        assert_eq!(store.set_baseline(10), vec![0]);
        assert_eq!(store.baseline(), 10);
        assert_eq!(brightness(&store, 0), 10);
        assert_eq!(brightness(&store, 1), 100);
        assert_eq!(store.sensor_state(SensorId::Sensor1).current_brightness, 100);
        assert_eq!(store.sensor_state(SensorId::Sensor2).current_brightness, 10);

        // Unchanged baseline is a no-op
        assert!(store.set_baseline(10).is_empty());

        store.clear_request_for_sensor(SensorId::Sensor1, &[1]);
        assert_eq!(brightness(&store, 1), 10);
    }
}

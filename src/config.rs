use crate::error::{LightingError, Result};
use crate::state::{SegmentIndex, SensorId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::watch;

/// Load environment variables from a .env file.
/// Values may contain spaces and may be wrapped in single or double quotes.
/// Variables already present in the environment win.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

pub fn load_dotenv_from(env_path: &Path) {
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var(key).is_err() {
            // SAFETY: only called at startup, before any task reads the environment
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Split a `KEY=value` line, ignoring blanks and `#` comments.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let mut value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }
    Some((key.trim(), value))
}

/// Which segments each sensor controls.
///
/// Segment lists are kept in configured order with duplicates removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMapping(BTreeMap<SensorId, Vec<SegmentIndex>>);

impl SegmentMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor: SensorId, segments: &[SegmentIndex]) -> Self {
        self.set(sensor, segments);
        self
    }

    pub fn set(&mut self, sensor: SensorId, segments: &[SegmentIndex]) {
        let mut unique = Vec::with_capacity(segments.len());
        for segment in segments {
            if !unique.contains(segment) {
                unique.push(*segment);
            }
        }
        self.0.insert(sensor, unique);
    }

    /// Segments for `sensor`; empty when not mapped.
    pub fn segments(&self, sensor: SensorId) -> &[SegmentIndex] {
        self.0.get(&sensor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sensors whose segment list differs between `self` and `other`.
    pub fn changed_sensors(&self, other: &SegmentMapping) -> Vec<SensorId> {
        SensorId::iter()
            .filter(|sensor| self.segments(*sensor) != other.segments(*sensor))
            .collect()
    }

    /// Parse a comma separated list such as `"0, 1,2"`.
    pub fn parse_list(list: &str) -> Result<Vec<SegmentIndex>> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<SegmentIndex>().map_err(|e| {
                    LightingError::InvalidSettings(format!("bad segment index {item:?}: {e}"))
                })
            })
            .collect()
    }
}

/// Live-tunable lighting behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub segment_mapping: SegmentMapping,
    /// Total time for a ramp up to max brightness
    pub ramp_duration: Duration,
    /// Time spent at max brightness before decaying
    pub hold_duration: Duration,
    /// Delay between hardware polls
    pub sensor_poll_delay: Duration,
    /// Raw readings above this value produce proximity events
    pub proximity_threshold: u32,
    /// Number of brightness steps in a ramp
    pub steps: u32,
    pub min_brightness: u8,
    pub max_brightness: u8,
    /// Floor for the per-step ramp delay
    pub min_step_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            segment_mapping: SegmentMapping::new()
                .with(SensorId::Sensor1, &[0, 1, 2])
                .with(SensorId::Sensor2, &[3, 4, 5])
                .with(SensorId::Sensor3, &[6, 7, 8])
                .with(SensorId::Sensor4, &[9, 10, 11])
                .with(SensorId::Sensor5, &[12, 13, 14]),
            ramp_duration: Duration::from_millis(5_000),
            hold_duration: Duration::from_millis(5_000),
            sensor_poll_delay: Duration::from_millis(1_000),
            proximity_threshold: 3_000,
            steps: 1,
            min_brightness: 1,
            max_brightness: 100,
            min_step_delay: Duration::from_millis(100),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(LightingError::InvalidSettings(
                "steps must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.min_brightness) || !(1..=100).contains(&self.max_brightness) {
            return Err(LightingError::InvalidSettings(format!(
                "brightness bounds must be within 1..=100, got {}..={}",
                self.min_brightness, self.max_brightness
            )));
        }
        if self.min_brightness > self.max_brightness {
            return Err(LightingError::InvalidSettings(format!(
                "min brightness {} exceeds max brightness {}",
                self.min_brightness, self.max_brightness
            )));
        }
        Ok(())
    }

    /// Delay between ramp steps: `ramp_duration / steps`, never below
    /// `min_step_delay`.
    pub fn step_delay(&self) -> Duration {
        let per_step = self.ramp_duration / self.steps.max(1);
        per_step.max(self.min_step_delay)
    }

    /// Apply `PROXIMITY_*` overrides from a variable lookup.
    fn apply_vars(&mut self, var: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let millis = |key: &str| var(key).and_then(|v| v.parse::<u64>().ok()).map(Duration::from_millis);

        if let Some(d) = millis("PROXIMITY_RAMP_MS") {
            self.ramp_duration = d;
        }
        if let Some(d) = millis("PROXIMITY_HOLD_MS") {
            self.hold_duration = d;
        }
        if let Some(d) = millis("PROXIMITY_POLL_MS") {
            self.sensor_poll_delay = d;
        }
        if let Some(d) = millis("PROXIMITY_MIN_STEP_DELAY_MS") {
            self.min_step_delay = d;
        }
        if let Some(threshold) = var("PROXIMITY_THRESHOLD")
            && let Ok(t) = threshold.parse()
        {
            self.proximity_threshold = t;
        }
        if let Some(steps) = var("PROXIMITY_STEPS")
            && let Ok(s) = steps.parse()
        {
            self.steps = s;
        }
        if let Some(min) = var("PROXIMITY_MIN_BRIGHTNESS")
            && let Ok(m) = min.parse()
        {
            self.min_brightness = m;
        }
        if let Some(max) = var("PROXIMITY_MAX_BRIGHTNESS")
            && let Ok(m) = max.parse()
        {
            self.max_brightness = m;
        }

        for sensor in SensorId::iter() {
            let key = format!("PROXIMITY_{}_SEGMENTS", sensor.slug().to_ascii_uppercase());
            if let Some(list) = var(&key) {
                let segments = SegmentMapping::parse_list(&list)?;
                self.segment_mapping.set(sensor, &segments);
            }
        }

        self.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Root for `<prefix>/<sensor>/proximity` and `<prefix>/set`
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub lighting: Settings,
    pub mqtt: MqttConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lighting: Settings::default(),
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "proximity-lighting".to_string(),
                username: None,
                password: None,
                topic_prefix: "proximity-lighting".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults plus whatever `var` returns.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        config.lighting.apply_vars(&var)?;

        if let Some(host) = var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Some(client_id) = var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(username) = var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(prefix) = var("MQTT_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = prefix.trim_end_matches('/').to_string();
        }

        Ok(config)
    }
}

/// Shared, hot-reloadable settings.
///
/// Readers get a cheap `Arc` snapshot. Writers go through [`update`] which
/// validates the result before publishing it; rejected updates leave the
/// previous settings in place. Interested tasks watch for changes via
/// [`subscribe`].
///
/// [`update`]: SettingsHandle::update
/// [`subscribe`]: SettingsHandle::subscribe
pub struct SettingsHandle {
    current: RwLock<Arc<Settings>>,
    changes: watch::Sender<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let (changes, _) = watch::channel(settings.clone());
        Ok(Self {
            current: RwLock::new(settings),
            changes,
        })
    }

    /// Current settings snapshot.
    pub fn get(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Modify a copy of the settings and publish it if valid.
    pub fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<Arc<Settings>> {
        let mut current = self.current.write();
        let mut next = Settings::clone(&current);
        apply(&mut next);
        next.validate()?;

        let next = Arc::new(next);
        *current = next.clone();
        drop(current);

        self.changes.send_replace(next.clone());
        Ok(next)
    }

    /// Restore the built-in defaults.
    pub fn reset_to_defaults(&self) -> Result<Arc<Settings>> {
        self.update(|settings| *settings = Settings::default())
    }

    /// Receiver that wakes on every accepted update.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.changes.subscribe()
    }
}

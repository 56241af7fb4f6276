//! Collector configuration
//!
//! The persisted configuration is a flat key/value JSON document whose values are
//! usually strings (`"rr_window": "5"`). [`CollectorConfig`] is the single place
//! where every key is enumerated and defaulted; invalid or missing keys fall back
//! to their defaults with a warning instead of failing.

use crate::classifier::{DEFAULT_DECISION_BOUNDARY, DEFAULT_DWELL_SECS};
use crate::error::{ConfigError, PulseError};
use crate::hrv::{DEFAULT_RR_WINDOW, MAX_RR_WINDOW};
use crate::recorder::RecordOptions;
use crate::types::TimeBase;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted analysis and display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// RR intervals in the sdNN window (1..=999)
    pub rr_window: usize,
    /// Minimum seconds in state 0 before leaving it
    pub time_in_state_0: u64,
    /// Minimum seconds in state 1 before leaving it
    pub time_in_state_1: u64,
    /// sdNN above this value classifies as state 1
    pub decision_boundary: f64,
    pub display_states: bool,
    pub display_decision_boundary: bool,
    /// Display hint, passed through untouched
    pub representation_type_value: String,
    /// Display hint, passed through untouched
    pub window_limit_value: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            rr_window: DEFAULT_RR_WINDOW,
            time_in_state_0: DEFAULT_DWELL_SECS as u64,
            time_in_state_1: DEFAULT_DWELL_SECS as u64,
            decision_boundary: DEFAULT_DECISION_BOUNDARY,
            display_states: false,
            display_decision_boundary: false,
            representation_type_value: String::new(),
            window_limit_value: String::new(),
        }
    }
}

impl CollectorConfig {
    /// Build a configuration from a persisted key/value document.
    ///
    /// Each key is read independently; a bad value only resets that key.
    pub fn from_document(doc: &Map<String, Value>) -> Self {
        let defaults = Self::default();

        let rr_window = resolve(
            "rr_window",
            read_integer(doc, "rr_window").and_then(|v| {
                if (1..=MAX_RR_WINDOW as i64).contains(&v) {
                    Ok(v as usize)
                } else {
                    Err(ConfigError::Invalid {
                        key: "rr_window",
                        value: v.to_string(),
                        reason: format!("must be between 1 and {}", MAX_RR_WINDOW),
                    })
                }
            }),
            defaults.rr_window,
        );

        let time_in_state_0 = resolve(
            "time_in_state_0",
            read_integer(doc, "time_in_state_0").and_then(|v| non_negative("time_in_state_0", v)),
            defaults.time_in_state_0,
        );

        let time_in_state_1 = resolve(
            "time_in_state_1",
            read_integer(doc, "time_in_state_1").and_then(|v| non_negative("time_in_state_1", v)),
            defaults.time_in_state_1,
        );

        let decision_boundary = resolve(
            "decision_boundary",
            read_number(doc, "decision_boundary"),
            defaults.decision_boundary,
        );

        Self {
            rr_window,
            time_in_state_0,
            time_in_state_1,
            decision_boundary,
            display_states: resolve(
                "display_states",
                read_bool(doc, "display_states"),
                defaults.display_states,
            ),
            display_decision_boundary: resolve(
                "display_decision_boundary",
                read_bool(doc, "display_decision_boundary"),
                defaults.display_decision_boundary,
            ),
            representation_type_value: read_text(doc, "representation_type_value")
                .unwrap_or(defaults.representation_type_value),
            window_limit_value: read_text(doc, "window_limit_value")
                .unwrap_or(defaults.window_limit_value),
        }
    }

    /// Load from a JSON file, falling back to defaults when it is absent or unreadable
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!(
                    "Cannot read configuration {} ({}), using defaults",
                    path.display(),
                    e
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(doc)) => Self::from_document(&doc),
            Ok(_) => {
                log::warn!("Configuration {} is not an object, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                log::warn!("Invalid configuration {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persisted form: every value as a string, matching what `from_document` reads
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("rr_window".into(), Value::String(self.rr_window.to_string()));
        doc.insert(
            "time_in_state_0".into(),
            Value::String(self.time_in_state_0.to_string()),
        );
        doc.insert(
            "time_in_state_1".into(),
            Value::String(self.time_in_state_1.to_string()),
        );
        doc.insert(
            "decision_boundary".into(),
            Value::String(self.decision_boundary.to_string()),
        );
        doc.insert("display_states".into(), Value::Bool(self.display_states));
        doc.insert(
            "display_decision_boundary".into(),
            Value::Bool(self.display_decision_boundary),
        );
        doc.insert(
            "representation_type_value".into(),
            Value::String(self.representation_type_value.clone()),
        );
        doc.insert(
            "window_limit_value".into(),
            Value::String(self.window_limit_value.clone()),
        );
        doc
    }

    pub fn save(&self, path: &Path) -> Result<(), PulseError> {
        let json = serde_json::to_string_pretty(&Value::Object(self.to_document()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Dwell thresholds in seconds, indexed by state
    pub fn dwell_secs(&self) -> [f64; 2] {
        [self.time_in_state_0 as f64, self.time_in_state_1 as f64]
    }
}

/// Per-session collection flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub experiment_name: String,
    pub participant_id: String,
    /// Start the PMD ECG stream alongside heart rate
    pub capture_ecg: bool,
    /// Stamp every sample with the local time of day
    pub save_current_time: bool,
    /// Record sdNN and classifier state with every RR row
    pub record_sdnn: bool,
    /// Publish live plot points
    pub display_graph: bool,
    /// Directory the session files are written to
    pub output_dir: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            experiment_name: "session".to_string(),
            participant_id: "anonymous".to_string(),
            capture_ecg: false,
            save_current_time: false,
            record_sdnn: false,
            display_graph: false,
            output_dir: PathBuf::from("."),
        }
    }
}

impl SessionOptions {
    /// Base path for output files: `{output_dir}/{experiment}-{participant}`
    pub fn output_base(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}", self.experiment_name, self.participant_id))
    }

    pub fn time_base(&self) -> TimeBase {
        if self.save_current_time {
            TimeBase::WallClock
        } else {
            TimeBase::Relative
        }
    }

    pub fn record_options(&self) -> RecordOptions {
        RecordOptions {
            save_wall_clock: self.save_current_time,
            record_sdnn: self.record_sdnn,
        }
    }
}

fn resolve<T>(key: &'static str, value: Result<T, ConfigError>, default: T) -> T {
    match value {
        Ok(v) => v,
        Err(ConfigError::Missing(_)) => default,
        Err(e) => {
            log::warn!("{}; using default for {}", e, key);
            default
        }
    }
}

fn non_negative(key: &'static str, v: i64) -> Result<u64, ConfigError> {
    u64::try_from(v).map_err(|_| ConfigError::Invalid {
        key,
        value: v.to_string(),
        reason: "must not be negative".to_string(),
    })
}

fn invalid(key: &'static str, value: &Value, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn read_integer(doc: &Map<String, Value>, key: &'static str) -> Result<i64, ConfigError> {
    match doc.get(key) {
        None | Some(Value::Null) => Err(ConfigError::Missing(key)),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| invalid(key, &Value::Number(n.clone()), "not an integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| invalid(key, &Value::String(s.clone()), &e.to_string())),
        Some(other) => Err(invalid(key, other, "expected an integer string")),
    }
}

fn read_number(doc: &Map<String, Value>, key: &'static str) -> Result<f64, ConfigError> {
    let value = match doc.get(key) {
        None | Some(Value::Null) => return Err(ConfigError::Missing(key)),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(invalid(key, &doc[key], "expected a finite number")),
    }
}

fn read_bool(doc: &Map<String, Value>, key: &'static str) -> Result<bool, ConfigError> {
    match doc.get(key) {
        None | Some(Value::Null) => Err(ConfigError::Missing(key)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(invalid(key, &doc[key], "expected a boolean")),
        },
        Some(other) => Err(invalid(key, other, "expected a boolean")),
    }
}

fn read_text(doc: &Map<String, Value>, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.rr_window, 5);
        assert_eq!(config.dwell_secs(), [40.0, 40.0]);
        assert_eq!(config.decision_boundary, 100.0);
    }

    #[test]
    fn test_string_valued_document() {
        let config = CollectorConfig::from_document(&doc(json!({
            "rr_window": "12",
            "time_in_state_0": "30",
            "time_in_state_1": "90",
            "decision_boundary": "85.5",
            "display_states": true,
            "display_decision_boundary": "false",
            "representation_type_value": "line",
            "window_limit_value": "60"
        })));

        assert_eq!(config.rr_window, 12);
        assert_eq!(config.dwell_secs(), [30.0, 90.0]);
        assert_eq!(config.decision_boundary, 85.5);
        assert!(config.display_states);
        assert!(!config.display_decision_boundary);
        assert_eq!(config.representation_type_value, "line");
        assert_eq!(config.window_limit_value, "60");
    }

    #[test]
    fn test_invalid_values_fall_back_per_key() {
        let config = CollectorConfig::from_document(&doc(json!({
            "rr_window": "0",
            "time_in_state_0": "-5",
            "time_in_state_1": "abc",
            "decision_boundary": "NaN",
            "display_states": "maybe"
        })));

        assert_eq!(config, CollectorConfig::default());

        let config = CollectorConfig::from_document(&doc(json!({
            "rr_window": "1000",
            "time_in_state_1": 15
        })));
        assert_eq!(config.rr_window, 5);
        assert_eq!(config.time_in_state_1, 15);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = CollectorConfig {
            rr_window: 30,
            decision_boundary: 72.0,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["rr_window"], "30");

        assert_eq!(CollectorConfig::load(&path), config);
    }

    #[test]
    fn test_load_missing_or_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            CollectorConfig::load(&dir.path().join("nope.json")),
            CollectorConfig::default()
        );

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert_eq!(CollectorConfig::load(&broken), CollectorConfig::default());
    }

    #[test]
    fn test_session_options_paths() {
        let options = SessionOptions {
            experiment_name: "stroop".to_string(),
            participant_id: "p07".to_string(),
            output_dir: PathBuf::from("/data"),
            save_current_time: true,
            ..Default::default()
        };

        assert_eq!(options.output_base(), PathBuf::from("/data/stroop-p07"));
        assert_eq!(options.time_base(), TimeBase::WallClock);
        assert!(options.record_options().save_wall_clock);
    }
}

//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Looper behaviour (tick interval, wrap-around, break skipping)
//! - Per-kind time point prototypes
//! - Saved cycle patterns and the active one
//! - An explicit time point list, when one was applied
//! - The currently selected work item
//!
//! Configuration is stored at `~/.config/pomoloop/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::data_dir;
use crate::error::ConfigError;
use crate::timer::{pattern, validate_time_points, TimePoint, TimePointPrototype};

/// Looper behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooperConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Restart the cycle after its last time point instead of stopping.
    #[serde(default = "default_true")]
    pub wrap_around: bool,
    #[serde(default)]
    pub disable_skip_break: bool,
}

/// Saved cycle patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternsConfig {
    #[serde(default = "default_saved_patterns")]
    pub saved: Vec<String>,
    /// Pattern the time point list was last built from.
    #[serde(default)]
    pub active: Option<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pomoloop/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Work item the ledger records for; none means nothing is recorded.
    #[serde(default)]
    pub current_work_id: Option<i64>,
    #[serde(default)]
    pub looper: LooperConfig,
    #[serde(default = "TimePointPrototype::defaults")]
    pub prototypes: Vec<TimePointPrototype>,
    #[serde(default)]
    pub patterns: PatternsConfig,
    /// Explicit cycle. Takes precedence over `patterns.active`.
    #[serde(default)]
    pub time_points: Option<Vec<TimePoint>>,
}

/// Settings port for the ordered time point list.
pub trait TimePointSettings {
    /// The configured cycle.
    ///
    /// # Errors
    /// Returns `ConfigError` when the stored list or pattern is malformed.
    fn time_points(&self) -> Result<Vec<TimePoint>, ConfigError>;

    /// Replace the configured cycle.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidTimePoints` and leaves the settings
    /// untouched when the list does not validate.
    fn set_time_points(&mut self, time_points: Vec<TimePoint>) -> Result<(), ConfigError>;
}

// Default functions
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_saved_patterns() -> Vec<String> {
    vec![pattern::DEFAULT_PATTERN.to_string()]
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            wrap_around: true,
            disable_skip_break: false,
        }
    }
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            saved: default_saved_patterns(),
            active: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            current_work_id: None,
            looper: LooperConfig::default(),
            prototypes: TimePointPrototype::defaults(),
            patterns: PatternsConfig::default(),
            time_points: None,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let unknown = || invalid("unknown config key".into());

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(invalid("config key is empty".into()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(format!("cannot parse '{value}' as bool: {e}")))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Unset optionals take JSON when it parses, else a plain string.
                    serde_json::Value::Null => serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.into())),
                    serde_json::Value::String(_) => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Location of the config file.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/pomoloop"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing the default there if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                cfg.validate()?;
                debug!(path = %path.display(), "config loaded");
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the result does not validate. `self` is unchanged on error.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Check values that serde alone cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.looper.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "looper.tick_interval_ms".into(),
                message: "must be positive".into(),
            });
        }
        if let Some(tps) = &self.time_points {
            validate_time_points(tps)?;
        }
        if let Some(active) = &self.patterns.active {
            pattern::expand(active, &self.prototypes)?;
        }
        Ok(())
    }

    /// Expand `pattern` with the configured prototypes and make it the cycle.
    ///
    /// The pattern is remembered in `patterns.saved`.
    pub fn apply_pattern(&mut self, pattern: &str) -> Result<Vec<TimePoint>, ConfigError> {
        let time_points = pattern::expand(pattern, &self.prototypes)?;
        self.time_points = Some(time_points.clone());
        self.patterns.active = Some(pattern.to_string());
        if !self.patterns.saved.iter().any(|p| p == pattern) {
            self.patterns.saved.push(pattern.to_string());
        }
        Ok(time_points)
    }
}

impl TimePointSettings for Config {
    fn time_points(&self) -> Result<Vec<TimePoint>, ConfigError> {
        if let Some(tps) = &self.time_points {
            validate_time_points(tps)?;
            return Ok(tps.clone());
        }
        let source = self
            .patterns
            .active
            .as_deref()
            .unwrap_or(pattern::DEFAULT_PATTERN);
        pattern::expand(source, &self.prototypes)
    }

    fn set_time_points(&mut self, time_points: Vec<TimePoint>) -> Result<(), ConfigError> {
        validate_time_points(&time_points)?;
        self.time_points = Some(time_points);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::Kind;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn empty_file_gets_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.looper.tick_interval_ms, 1000);
        assert!(parsed.looper.wrap_around);
        assert_eq!(parsed.prototypes.len(), 3);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("looper.wrap_around").as_deref(), Some("true"));
        assert_eq!(cfg.get("looper.tick_interval_ms").as_deref(), Some("1000"));
        assert_eq!(cfg.get("current_work_id").as_deref(), Some("null"));
        assert!(cfg.get("looper.missing_key").is_none());
    }

    #[test]
    fn set_value_updates_nested_fields() {
        let mut cfg = Config::default();
        cfg.set_value("looper.disable_skip_break", "true").unwrap();
        cfg.set_value("looper.tick_interval_ms", "250").unwrap();
        cfg.set_value("current_work_id", "12").unwrap();
        assert!(cfg.looper.disable_skip_break);
        assert_eq!(cfg.looper.tick_interval_ms, 250);
        assert_eq!(cfg.current_work_id, Some(12));
    }

    #[test]
    fn set_value_rejects_bad_input() {
        let mut cfg = Config::default();
        assert!(cfg.set_value("looper.nonexistent_key", "1").is_err());
        assert!(cfg.set_value("looper.wrap_around", "not_a_bool").is_err());
        assert!(cfg.set_value("looper.tick_interval_ms", "0").is_err());
        assert!(cfg.set_value("patterns.active", "w-zz").is_err());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn time_points_fall_back_to_default_pattern() {
        let cfg = Config::default();
        let tps = cfg.time_points().unwrap();
        assert_eq!(tps.len(), 8);
        assert_eq!(tps[7].kind, Kind::LongBreak);
    }

    #[test]
    fn apply_pattern_stores_explicit_list() {
        let mut cfg = Config::default();
        let tps = cfg.apply_pattern("w-b").unwrap();
        assert_eq!(cfg.time_points().unwrap(), tps);
        assert_eq!(cfg.patterns.active.as_deref(), Some("w-b"));
        assert!(cfg.patterns.saved.contains(&"w-b".to_string()));
    }

    #[test]
    fn set_time_points_rejects_zero_duration() {
        let mut cfg = Config::default();
        let bad = vec![TimePoint::new("Focus", Kind::Work, 0)];
        assert!(matches!(
            cfg.set_time_points(bad),
            Err(ConfigError::InvalidTimePoints(_))
        ));
        assert!(cfg.time_points.is_none());
    }

    #[test]
    fn load_from_writes_default_then_reads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let first = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let mut changed = first.clone();
        changed.apply_pattern("(w-b)2-lb").unwrap();
        changed.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, changed);
        assert_eq!(loaded.time_points().unwrap().len(), 5);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "looper = 3").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }
}

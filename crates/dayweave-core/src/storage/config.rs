//! TOML-based planner configuration.
//!
//! Stores everything a planning run treats as fixed:
//! - Planning timezone, window and work-unit limits
//! - Phase definitions (static clock table or solar)
//! - Ritual anchors
//! - Urgency tier thresholds
//! - Generative service endpoint
//! - Conflict resolution policy
//!
//! Configuration is stored at `~/.config/dayweave/config.toml`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::clock::{minutes_of_day, parse_clock};
use crate::error::ConfigError;
use crate::phase::{AnchorDefinition, PhaseDefinition, PhaseSource};
use crate::resolver::ResolvePolicy;
use crate::task::TierTable;

/// Run-wide planning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Tag written on every event a run creates
    #[serde(default = "default_generator_id")]
    pub generator_id: String,
    #[serde(default = "default_max_work_units")]
    pub max_work_units: usize,
    #[serde(default = "default_max_chunk_minutes")]
    pub max_chunk_minutes: u32,
    /// Gap left after each fallback placement
    #[serde(default = "default_buffer_minutes")]
    pub buffer_minutes: u32,
    #[serde(default = "default_day_start")]
    pub day_start: String, // HH:mm
    #[serde(default = "default_day_end")]
    pub day_end: String, // HH:mm
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseSourceKind {
    Static,
    Solar,
}

/// Phase configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(default = "default_phase_source")]
    pub source: PhaseSourceKind,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Accept a clock table that leaves parts of the day uncovered
    #[serde(default)]
    pub allow_gaps: bool,
    #[serde(default = "PhaseDefinition::default_table")]
    pub definitions: Vec<PhaseDefinition>,
}

/// Generative scheduling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub policy: ResolvePolicy,
}

/// Planner configuration.
///
/// Serialized to/from TOML at `~/.config/dayweave/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub phases: PhasesConfig,
    #[serde(default = "AnchorDefinition::default_anchors")]
    pub anchors: Vec<AnchorDefinition>,
    #[serde(default)]
    pub tiers: TierTable,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

// Default functions
fn default_timezone() -> String {
    "Europe/Amsterdam".into()
}
fn default_generator_id() -> String {
    "dayweave".into()
}
fn default_max_work_units() -> usize {
    24
}
fn default_max_chunk_minutes() -> u32 {
    90
}
fn default_buffer_minutes() -> u32 {
    5
}
fn default_day_start() -> String {
    "05:30".into()
}
fn default_day_end() -> String {
    "21:45".into()
}
fn default_phase_source() -> PhaseSourceKind {
    PhaseSourceKind::Static
}
fn default_true() -> bool {
    true
}
fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".into()
}
fn default_model() -> String {
    "openai/gpt-oss-20b".into()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    8192
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            generator_id: default_generator_id(),
            max_work_units: default_max_work_units(),
            max_chunk_minutes: default_max_chunk_minutes(),
            buffer_minutes: default_buffer_minutes(),
            day_start: default_day_start(),
            day_end: default_day_end(),
        }
    }
}

impl Default for PhasesConfig {
    fn default() -> Self {
        Self {
            source: PhaseSourceKind::Static,
            latitude: None,
            longitude: None,
            allow_gaps: false,
            definitions: PhaseDefinition::default_table(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            policy: ResolvePolicy::Drop,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planner: PlannerSection::default(),
            phases: PhasesConfig::default(),
            anchors: AnchorDefinition::default_anchors(),
            tiers: TierTable::default(),
            generator: GeneratorConfig::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl PhasesConfig {
    pub fn source(&self) -> Result<PhaseSource, ConfigError> {
        match self.source {
            PhaseSourceKind::Static => Ok(PhaseSource::Static),
            PhaseSourceKind::Solar => {
                let latitude = self
                    .latitude
                    .ok_or_else(|| invalid("phases.latitude", "required for solar phases"))?;
                let longitude = self
                    .longitude
                    .ok_or_else(|| invalid("phases.longitude", "required for solar phases"))?;
                Ok(PhaseSource::Solar {
                    latitude,
                    longitude,
                })
            }
        }
    }
}

impl PlannerConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = match current {
                serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let bad = |message: String| invalid(key, message);

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            let slot = match current {
                serde_json::Value::Object(obj) => obj.get_mut(part).ok_or_else(unknown)?,
                serde_json::Value::Array(items) => {
                    let index: usize = part.parse().map_err(|_| unknown())?;
                    items.get_mut(index).ok_or_else(unknown)?
                }
                _ => return Err(unknown()),
            };

            if is_leaf {
                let new_value = match slot {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| bad(format!("cannot parse '{value}' as bool")))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| bad(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(bad(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| bad(e.to_string()))?
                    }
                    // Unset optional: take JSON if it parses, else a string
                    serde_json::Value::Null => serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(value.into())),
                    serde_json::Value::String(_) => serde_json::Value::String(value.into()),
                };
                *slot = new_value;
                return Ok(());
            }

            current = slot;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: PlannerConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key
    /// (`planner.timezone`, `anchors.0.name`).
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by key and validate the result. Does not persist; call
    /// [`save`](Self::save) afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting configuration is invalid.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: PlannerConfig =
            serde_json::from_value(json).map_err(|e| invalid(key, e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(&self.planner.timezone)
            .map_err(|_| invalid("planner.timezone", format!("unknown timezone '{}'", self.planner.timezone)))
    }

    /// Check everything that can be checked without a target date.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;

        let p = &self.planner;
        if p.generator_id.trim().is_empty() || p.generator_id.contains('/') {
            return Err(invalid(
                "planner.generator_id",
                "must be non-empty and must not contain '/'",
            ));
        }
        if p.max_chunk_minutes == 0 {
            return Err(invalid("planner.max_chunk_minutes", "must be greater than zero"));
        }
        if p.max_work_units == 0 {
            return Err(invalid("planner.max_work_units", "must be greater than zero"));
        }
        let start = parse_clock(&p.day_start)
            .ok_or_else(|| invalid("planner.day_start", format!("'{}' is not HH:MM", p.day_start)))?;
        let end = parse_clock(&p.day_end)
            .ok_or_else(|| invalid("planner.day_end", format!("'{}' is not HH:MM", p.day_end)))?;
        if minutes_of_day(end) <= minutes_of_day(start) {
            return Err(invalid("planner.day_end", "must be after planner.day_start"));
        }

        if self.phases.definitions.is_empty() {
            return Err(invalid("phases.definitions", "at least one phase is required"));
        }
        for def in &self.phases.definitions {
            for clock in [&def.start, &def.end] {
                if parse_clock(clock).is_none() {
                    return Err(invalid(
                        "phases.definitions",
                        format!("{} has invalid time '{clock}'", def.name),
                    ));
                }
            }
        }
        if let PhaseSource::Solar {
            latitude,
            longitude,
        } = self.phases.source()?
        {
            if !(-90.0..=90.0).contains(&latitude) {
                return Err(invalid("phases.latitude", "must be within -90..=90"));
            }
            if !(-180.0..=180.0).contains(&longitude) {
                return Err(invalid("phases.longitude", "must be within -180..=180"));
            }
        }

        for anchor in &self.anchors {
            if let Some(start) = &anchor.start {
                if parse_clock(start).is_none() {
                    return Err(invalid(
                        "anchors",
                        format!("'{}' has invalid start '{start}'", anchor.name),
                    ));
                }
            }
        }

        self.tiers.validate()?;

        if self.generator.timeout_secs == 0 {
            return Err(invalid("generator.timeout_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = PlannerConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: PlannerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        parsed.validate().unwrap();
    }

    #[test]
    fn empty_file_yields_defaults() {
        let parsed: PlannerConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.planner.max_chunk_minutes, 90);
        assert_eq!(parsed.planner.max_work_units, 24);
        assert_eq!(parsed.phases.definitions.len(), 5);
        assert_eq!(parsed.anchors.len(), 3);
        assert_eq!(parsed.generator.timeout_secs, 30);
        assert_eq!(parsed.resolver.policy, ResolvePolicy::Drop);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let parsed: PlannerConfig = toml::from_str(
            r#"
            [planner]
            max_chunk_minutes = 180

            [resolver]
            policy = "shift"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.planner.max_chunk_minutes, 180);
        assert_eq!(parsed.planner.timezone, "Europe/Amsterdam");
        assert_eq!(parsed.resolver.policy, ResolvePolicy::Shift);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = PlannerConfig::default();
        assert_eq!(cfg.get("planner.timezone").as_deref(), Some("Europe/Amsterdam"));
        assert_eq!(cfg.get("planner.max_chunk_minutes").as_deref(), Some("90"));
        assert_eq!(cfg.get("anchors.1.name").as_deref(), Some("Midday pause"));
        assert!(cfg.get("planner.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = PlannerConfig::default();
        cfg.set("planner.max_chunk_minutes", "120").unwrap();
        cfg.set("generator.enabled", "false").unwrap();
        cfg.set("resolver.policy", "shift").unwrap();
        assert_eq!(cfg.planner.max_chunk_minutes, 120);
        assert!(!cfg.generator.enabled);
        assert_eq!(cfg.resolver.policy, ResolvePolicy::Shift);
    }

    #[test]
    fn set_fills_unset_optionals() {
        let mut cfg = PlannerConfig::default();
        cfg.set("phases.latitude", "52.01").unwrap();
        assert_eq!(cfg.phases.latitude, Some(52.01));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = PlannerConfig::default();
        assert!(matches!(
            cfg.set("planner.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = PlannerConfig::default();
        assert!(cfg.set("generator.enabled", "not_a_bool").is_err());
        assert!(cfg.set("planner.max_chunk_minutes", "lots").is_err());
    }

    #[test]
    fn set_validates_result() {
        let mut cfg = PlannerConfig::default();
        assert!(cfg.set("planner.timezone", "Mars/Olympus").is_err());
        assert!(cfg.set("planner.max_chunk_minutes", "0").is_err());
        // Nothing changed on failure
        assert_eq!(cfg, PlannerConfig::default());
    }

    #[test]
    fn solar_source_needs_coordinates() {
        let mut cfg = PlannerConfig::default();
        cfg.phases.source = PhaseSourceKind::Solar;
        assert!(cfg.validate().is_err());
        cfg.phases.latitude = Some(52.0);
        cfg.phases.longitude = Some(4.4);
        cfg.validate().unwrap();
        assert!(matches!(cfg.phases.source().unwrap(), PhaseSource::Solar { .. }));
    }

    #[test]
    fn load_and_save_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = PlannerConfig::default();
        cfg.planner.timezone = "America/New_York".into();
        cfg.save_to(&path).unwrap();

        let loaded = PlannerConfig::load_from(&path).unwrap();
        assert_eq!(loaded.planner.timezone, "America/New_York");
        assert_eq!(loaded.timezone().unwrap(), chrono_tz::America::New_York);

        std::fs::write(&path, "[planner]\nmax_work_units = 0\n").unwrap();
        assert!(PlannerConfig::load_from(&path).is_err());
    }
}

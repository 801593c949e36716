use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_CYCLE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 750;
pub const DEFAULT_TOP_COUNT: usize = 5;
pub const DEFAULT_NAME_WIDTH: usize = 24;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampler: SamplerConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub cycle_interval_ms: u64,
    pub process_interval_ms: u64,
    pub top_count: usize,
    pub name_width: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            process_interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            top_count: DEFAULT_TOP_COUNT,
            name_width: DEFAULT_NAME_WIDTH,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to poll. Empty selects the first non-loopback interface.
    pub interface: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Runtime knobs of the sampler, normalized from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSettings {
    pub cycle_interval: Duration,
    pub process_interval: Duration,
    pub top_count: usize,
    pub name_width: usize,
    pub preferred_interface: Option<String>,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        SamplerSettings::from(&Config::default())
    }
}

impl From<&Config> for SamplerSettings {
    fn from(config: &Config) -> Self {
        let nonzero = |ms: u64, fallback: u64| Duration::from_millis(if ms == 0 { fallback } else { ms });
        let interface = config.network.interface.trim();
        SamplerSettings {
            cycle_interval: nonzero(config.sampler.cycle_interval_ms, DEFAULT_CYCLE_INTERVAL_MS),
            process_interval: nonzero(
                config.sampler.process_interval_ms,
                DEFAULT_PROCESS_INTERVAL_MS,
            ),
            top_count: config.sampler.top_count.max(1),
            name_width: if config.sampler.name_width == 0 {
                DEFAULT_NAME_WIDTH
            } else {
                config.sampler.name_width
            },
            preferred_interface: (!interface.is_empty()).then(|| interface.to_string()),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pulsebar").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.sampler.cycle_interval_ms, 500);
        assert_eq!(config.sampler.process_interval_ms, 750);
        assert_eq!(config.sampler.top_count, 5);
        assert!(config.network.interface.is_empty());
        assert_eq!(config.logging.level, "warn");
        assert!(!config.logging.json);
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[sampler]
cycle_interval_ms = 1000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sampler.cycle_interval_ms, 1000);
        // Other fields should be defaults
        assert_eq!(config.sampler.process_interval_ms, 750);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[sampler]
cycle_interval_ms = 250
process_interval_ms = 400
top_count = 3
name_width = 16

[network]
interface = "eth1"

[logging]
level = "debug"
json = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let settings = SamplerSettings::from(&config);
        assert_eq!(settings.cycle_interval, Duration::from_millis(250));
        assert_eq!(settings.process_interval, Duration::from_millis(400));
        assert_eq!(settings.top_count, 3);
        assert_eq!(settings.name_width, 16);
        assert_eq!(settings.preferred_interface.as_deref(), Some("eth1"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let mut config = Config::default();
        config.sampler.cycle_interval_ms = 0;
        config.sampler.process_interval_ms = 0;
        config.sampler.top_count = 0;
        config.sampler.name_width = 0;
        config.network.interface = "   ".to_string();
        let settings = SamplerSettings::from(&config);
        assert_eq!(settings, SamplerSettings::default());
        assert_eq!(settings.top_count, 5);
        assert!(settings.preferred_interface.is_none());
    }

    #[test]
    fn missing_file_returns_default() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config.sampler.cycle_interval_ms, 500);
    }

    #[test]
    fn invalid_toml_returns_default() {
        let temp = std::env::temp_dir().join("pulsebar_test_invalid.toml");
        std::fs::write(&temp, "this is not valid toml {{{{").unwrap();
        let config = load_config_from_path(&temp);
        assert_eq!(config.sampler.cycle_interval_ms, 500);
        let _ = std::fs::remove_file(&temp);
    }
}

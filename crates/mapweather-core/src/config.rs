use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides `weather.api_key`
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Default OpenWeatherMap host
pub const DEFAULT_WEATHER_ENDPOINT: &str = "https://api.openweathermap.org";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Weather API settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Simulated device used by the demo binary
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap API key. Can also be supplied via `OPENWEATHER_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the weather API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_WEATHER_ENDPOINT.to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
        }
    }
}

impl WeatherConfig {
    /// The configured key, if it is present and well formed
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| api_key_is_well_formed(key))
    }
}

/// A key is usable when it is non-empty, has no whitespace or control
/// characters, and is not the `YOUR_...` placeholder.
pub fn api_key_is_well_formed(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_graphic()) && !key.starts_with("YOUR_")
}

/// Location authorization states, as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationSetting {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Reported device latitude. Leave unset to simulate "no fix yet".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Authorization state at startup
    #[serde(default)]
    pub authorization: AuthorizationSetting,

    /// What the user answers when asked for permission
    #[serde(default = "default_prompt_answer")]
    pub prompt_answer: AuthorizationSetting,

    /// Whether location services are switched on at all
    #[serde(default = "default_services_enabled")]
    pub services_enabled: bool,
}

fn default_prompt_answer() -> AuthorizationSetting {
    AuthorizationSetting::AuthorizedWhenInUse
}

fn default_services_enabled() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            authorization: AuthorizationSetting::default(),
            prompt_answer: default_prompt_answer(),
            services_enabled: default_services_enabled(),
        }
    }
}

impl DeviceConfig {
    /// The simulated fix, only when both halves are set
    pub fn coordinate(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Load configuration from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns an error if validation fails with errors; warnings are logged.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        Self::load()?.into_validated()
    }

    /// Validate an already loaded configuration, failing on errors
    pub fn into_validated(self) -> Result<(Self, ValidationResult)> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((self, validation))
    }

    /// A non-empty override replaces whatever key the file had
    pub fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Using weather API key from {}", API_KEY_ENV);
            self.weather.api_key = Some(key);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.weather.endpoint, "weather.endpoint", &mut result);

        match self.weather.api_key.as_deref() {
            None => result.add_warning(
                "weather.api_key",
                format!("No API key configured (set it here or via {API_KEY_ENV}); weather is disabled"),
            ),
            Some(_) if self.weather.usable_api_key().is_none() => result.add_warning(
                "weather.api_key",
                "API key is malformed; weather is disabled",
            ),
            Some(_) => {}
        }

        match (self.device.latitude, self.device.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    result.add_error("device.latitude", format!("Latitude out of range: {lat}"));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    result.add_error("device.longitude", format!("Longitude out of range: {lon}"));
                }
            }
            (Some(_), None) => {
                result.add_error("device.longitude", "Latitude is set but longitude is missing")
            }
            (None, Some(_)) => {
                result.add_error("device.latitude", "Longitude is set but latitude is missing")
            }
            (None, None) => {}
        }

        if !self.device.services_enabled {
            result.add_warning(
                "device.services_enabled",
                "Location services are disabled; locate requests will be ignored",
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound("platform config directory".into()))?
            .join("mapweather");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        // Missing key is only a warning
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.field == "weather.api_key"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = Config::default();
        config.weather.endpoint = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.endpoint"));
    }

    #[test]
    fn test_invalid_endpoint_scheme() {
        let mut config = Config::default();
        config.weather.endpoint = "ftp://api.openweathermap.org".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_device_coordinate_range() {
        let mut config = Config::default();
        config.device.latitude = Some(91.0);
        config.device.longitude = Some(126.9);
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "device.latitude"));
    }

    #[test]
    fn test_device_coordinate_needs_both_halves() {
        let mut config = Config::default();
        config.device.latitude = Some(37.5);
        let result = config.validate();
        assert!(!result.is_valid());
        assert_eq!(config.device.coordinate(), None);
    }

    #[test]
    fn test_api_key_well_formed() {
        assert!(api_key_is_well_formed("0123456789abcdef0123456789abcdef"));
        assert!(!api_key_is_well_formed(""));
        assert!(!api_key_is_well_formed("has space"));
        assert!(!api_key_is_well_formed("tab\tkey"));
        assert!(!api_key_is_well_formed("YOUR_OPENWEATHER_KEY"));
    }

    #[test]
    fn test_usable_api_key_trims() {
        let config = WeatherConfig {
            api_key: Some("  abc123  ".to_string()),
            ..Default::default()
        };
        assert_eq!(config.usable_api_key(), Some("abc123"));
    }

    #[test]
    fn test_malformed_api_key_is_warning() {
        let mut config = Config::default();
        config.weather.api_key = Some("not a key".to_string());
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.field == "weather.api_key" && w.message.contains("malformed")));
    }

    #[test]
    fn test_api_key_override() {
        let mut config = Config::default();
        config.weather.api_key = Some("from-file".to_string());

        config.apply_api_key_override(Some("   ".to_string()));
        assert_eq!(config.weather.api_key.as_deref(), Some("from-file"));

        config.apply_api_key_override(Some("from-env".to_string()));
        assert_eq!(config.weather.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_load_from_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.weather.endpoint, DEFAULT_WEATHER_ENDPOINT);
        assert_eq!(config.device.authorization, AuthorizationSetting::NotDetermined);
    }

    #[test]
    fn test_load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[weather]
api_key = "abc123"

[device]
latitude = 37.5665
longitude = 126.978
authorization = "authorized_when_in_use"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.weather.usable_api_key(), Some("abc123"));
        assert_eq!(config.weather.endpoint, DEFAULT_WEATHER_ENDPOINT);
        assert_eq!(config.device.coordinate(), Some((37.5665, 126.978)));
        assert_eq!(
            config.device.authorization,
            AuthorizationSetting::AuthorizedWhenInUse
        );
        assert_eq!(
            config.device.prompt_answer,
            AuthorizationSetting::AuthorizedWhenInUse
        );
        assert!(config.device.services_enabled);
    }

    #[test]
    fn test_load_from_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "weather = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_into_validated_rejects_errors() {
        let mut config = Config::default();
        config.weather.endpoint = "ftp://example.com".to_string();

        let err = config.into_validated().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(summary)) if summary.contains("weather.endpoint")
        ));
    }

    #[test]
    fn test_into_validated_keeps_warnings() {
        let (config, validation) = Config::default().into_validated().unwrap();
        assert_eq!(config.weather.endpoint, DEFAULT_WEATHER_ENDPOINT);
        assert!(!validation.warnings.is_empty());
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert_eq!(summary, "field1: error1; field2: error2");
    }
}

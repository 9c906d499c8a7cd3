use std::fmt;
use std::sync::Arc;

use mapweather_core::{AppError, AuthorizationSetting, ReqwestErrorExt, WeatherError};
use serde::Deserialize;

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Used whenever location access is denied
    pub const FALLBACK: Coordinate = Coordinate {
        latitude: 37.519485,
        longitude: 126.890398,
    };

    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// Permission state as far as the coordinator cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
    /// Blocked by policy; the user can't change it
    Restricted,
}

/// Raw authorization state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

impl AuthorizationStatus {
    /// Collapse the platform state into the cases the coordinator branches
    /// on. Restricted stays separate: it neither prompts nor falls back.
    pub fn permission(self) -> PermissionStatus {
        match self {
            Self::NotDetermined => PermissionStatus::Unknown,
            Self::AuthorizedAlways | Self::AuthorizedWhenInUse => PermissionStatus::Granted,
            Self::Denied => PermissionStatus::Denied,
            Self::Restricted => PermissionStatus::Restricted,
        }
    }
}

impl From<AuthorizationSetting> for AuthorizationStatus {
    fn from(setting: AuthorizationSetting) -> Self {
        match setting {
            AuthorizationSetting::NotDetermined => Self::NotDetermined,
            AuthorizationSetting::Restricted => Self::Restricted,
            AuthorizationSetting::Denied => Self::Denied,
            AuthorizationSetting::AuthorizedAlways => Self::AuthorizedAlways,
            AuthorizationSetting::AuthorizedWhenInUse => Self::AuthorizedWhenInUse,
        }
    }
}

/// Current conditions at one point in time, in metric units
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    /// °C
    pub temperature: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    /// Percent
    pub humidity: u8,
    /// m/s
    pub wind_speed: f64,
}

/// https://openweathermap.org/current#fields_json
#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    main: MainBlock,
    wind: WindBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f64,
    temp_min: f64,
    temp_max: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
}

impl From<CurrentWeatherResponse> for WeatherSnapshot {
    fn from(response: CurrentWeatherResponse) -> Self {
        Self {
            temperature: response.main.temp,
            temp_min: response.main.temp_min,
            temp_max: response.main.temp_max,
            humidity: response.main.humidity,
            wind_speed: response.wind.speed,
        }
    }
}

impl WeatherSnapshot {
    /// Decode an OpenWeatherMap current-weather body. Unknown fields are ignored.
    pub fn from_json(body: &[u8]) -> Result<Self, FetchError> {
        let response: CurrentWeatherResponse =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(Arc::new(e)))?;
        Ok(response.into())
    }
}

/// A weather fetch that reached the network and failed.
///
/// Cloneable so it can travel on broadcast channels; the underlying cause is
/// shared.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Connection problems and non-2xx statuses
    #[error("Weather request failed: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("Weather response could not be decoded: {0}")]
    Decode(#[source] Arc<serde_json::Error>),
}

impl FetchError {
    /// HTTP status, when the server answered with an error status
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(Arc::new(e))
    }
}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Transport(source) => AppError::Network(source.to_network_error()),
            FetchError::Decode(source) => {
                AppError::Weather(WeatherError::Decode(source.to_string()))
            }
        }
    }
}

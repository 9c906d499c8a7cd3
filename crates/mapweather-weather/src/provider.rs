//! OpenWeatherMap current-weather client.

use std::fmt;

use mapweather_core::config::{api_key_is_well_formed, DEFAULT_WEATHER_ENDPOINT};
use mapweather_core::WeatherConfig;
use reqwest::Client;
use tracing::instrument;
use url::Url;

use crate::types::{Coordinate, FetchError, WeatherSnapshot};

const CURRENT_WEATHER_PATH: &str = "data/2.5/weather";
const UNITS: &str = "metric";

/// A well-formed API key. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for empty, whitespace-containing or placeholder keys
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        api_key_is_well_formed(key).then(|| Self(key.to_string()))
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    /// Endpoint with the current-weather path already applied
    weather_url: Url,
    api_key: ApiKey,
}

impl WeatherProvider {
    /// Provider for the public OpenWeatherMap host
    pub fn new(api_key: ApiKey) -> Result<Self, url::ParseError> {
        Self::with_endpoint(api_key, DEFAULT_WEATHER_ENDPOINT)
    }

    /// Point the provider at a different host, e.g. a mock server
    pub fn with_endpoint(api_key: ApiKey, endpoint: &str) -> Result<Self, url::ParseError> {
        let weather_url = Url::parse(endpoint)?.join(CURRENT_WEATHER_PATH)?;
        Ok(Self {
            client: Client::new(),
            weather_url,
            api_key,
        })
    }

    /// Build from configuration. `None` when no usable API key is configured,
    /// in which case weather is never fetched.
    pub fn from_config(config: &WeatherConfig) -> Result<Option<Self>, url::ParseError> {
        let Some(api_key) = config.usable_api_key().and_then(ApiKey::parse) else {
            tracing::warn!("No usable weather API key configured, weather fetches disabled");
            return Ok(None);
        };
        Self::with_endpoint(api_key, &config.endpoint).map(Some)
    }

    /// Full request URL for `coordinate`
    pub fn request_url(&self, coordinate: Coordinate) -> Url {
        let mut url = self.weather_url.clone();
        url.query_pairs_mut()
            .append_pair("lat", &coordinate.latitude.to_string())
            .append_pair("lon", &coordinate.longitude.to_string())
            .append_pair("appid", self.api_key.as_str())
            .append_pair("units", UNITS);
        url
    }

    /// Fetch current conditions at `coordinate`. One attempt, no caching.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch(&self, coordinate: Coordinate) -> Result<WeatherSnapshot, FetchError> {
        let response = self
            .client
            .get(self.request_url(coordinate))
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let snapshot = WeatherSnapshot::from_json(&body)?;
        tracing::debug!(
            "Fetched weather: {}°C, humidity {}%",
            snapshot.temperature,
            snapshot.humidity
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ApiKey {
        ApiKey::parse("testkey123").unwrap()
    }

    #[test]
    fn test_api_key_parse() {
        assert!(ApiKey::parse(" abc ").is_some());
        assert!(ApiKey::parse("").is_none());
        assert!(ApiKey::parse("a b").is_none());
        assert!(ApiKey::parse("YOUR_API_KEY").is_none());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "ApiKey(***)");
    }

    #[test]
    fn test_request_url() {
        let provider = WeatherProvider::new(key()).unwrap();
        let url = provider.request_url(Coordinate::FALLBACK);
        assert_eq!(
            url.as_str(),
            "https://api.openweathermap.org/data/2.5/weather?lat=37.519485&lon=126.890398&appid=testkey123&units=metric"
        );
    }

    #[test]
    fn test_request_url_keeps_endpoint_prefix() {
        let provider =
            WeatherProvider::with_endpoint(key(), "http://localhost:9000/proxy/").unwrap();
        let url = provider.request_url(Coordinate::new(-33.87, 151.21));
        assert_eq!(url.path(), "/proxy/data/2.5/weather");
        assert!(url.query().unwrap_or_default().contains("lat=-33.87"));
    }

    #[test]
    fn test_from_config_without_key() {
        let config = WeatherConfig::default();
        assert!(WeatherProvider::from_config(&config).unwrap().is_none());

        let config = WeatherConfig {
            api_key: Some("YOUR_KEY".to_string()),
            ..Default::default()
        };
        assert!(WeatherProvider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_from_config_with_key() {
        let config = WeatherConfig {
            api_key: Some("abc123".to_string()),
            ..Default::default()
        };
        assert!(WeatherProvider::from_config(&config).unwrap().is_some());
    }

    #[test]
    fn test_from_config_bad_endpoint() {
        let config = WeatherConfig {
            api_key: Some("abc123".to_string()),
            endpoint: "not a url".to_string(),
        };
        assert!(WeatherProvider::from_config(&config).is_err());
    }
}

//! Location-aware weather for MapWeather
//!
//! Resolves a coordinate from the device (or a fallback when location
//! access is denied), fetches current conditions from OpenWeatherMap and
//! publishes both to subscribers.

pub mod coordinator;
pub mod location;
pub mod provider;
pub mod types;

pub use coordinator::{
    Coordinator, CoordinatorHandle, Dropped, Subscriptions, Trigger, WeatherResult,
};
pub use location::{LocationManager, LocationObserver, SimulatedLocationManager};
pub use provider::{ApiKey, WeatherProvider};
pub use types::*;

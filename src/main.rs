use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mapweather_core::{AppError, Config, ConfigError, WeatherError};
use mapweather_weather::{
    AuthorizationStatus, Coordinator, SimulatedLocationManager, Subscriptions, WeatherProvider,
};
use tokio::time::timeout;

/// How long to wait for more output after the last event
const QUIET_PERIOD: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: mapweather [locate|refresh|grant|deny]...";

#[tokio::main]
async fn main() -> Result<()> {
    mapweather_core::init()?;

    let (config, _) = Config::load_validated().map_err(report_config_error)?;

    let manager = Arc::new(SimulatedLocationManager::from_config(&config.device));
    let provider =
        WeatherProvider::from_config(&config.weather).context("Invalid weather endpoint")?;
    if provider.is_none() {
        let e = AppError::from(WeatherError::MissingApiKey);
        tracing::warn!("{e}");
        println!("{}", e.user_message());
    }

    let handle = Coordinator::new(manager.clone(), provider).spawn();
    let mut subs = handle.subscribe();

    let mut commands: Vec<String> = std::env::args().skip(1).collect();
    if commands.is_empty() {
        commands.push("locate".to_string());
    }

    for command in &commands {
        match command.as_str() {
            "locate" => handle.locate(),
            "refresh" => handle.refresh(),
            "grant" => manager.set_status(AuthorizationStatus::AuthorizedWhenInUse),
            "deny" => manager.set_status(AuthorizationStatus::Denied),
            other => anyhow::bail!("Unknown command `{other}`\n{USAGE}"),
        }
    }

    print_events(&mut subs).await;

    tracing::info!("Refresh target is now {}", handle.last_resolved());
    handle.shutdown().await;

    Ok(())
}

/// Show the user-facing message for configuration problems before bailing
fn report_config_error(e: anyhow::Error) -> anyhow::Error {
    match e.downcast::<ConfigError>() {
        Ok(config_error) => {
            let e = AppError::from(config_error);
            eprintln!("{}", e.user_message());
            e.into()
        }
        Err(e) => e,
    }
}

/// Print published events until nothing arrives for a while
async fn print_events(subs: &mut Subscriptions) {
    loop {
        let event = timeout(QUIET_PERIOD, async {
            tokio::select! {
                Ok(coordinate) = subs.coordinate.recv() => {
                    println!("Location: {coordinate}");
                    true
                }
                Ok(status) = subs.permission.recv() => {
                    println!("Authorization: {status:?}");
                    true
                }
                Ok(result) = subs.weather.recv() => {
                    match result {
                        Ok(weather) => println!(
                            "Temperature: {}°C (min {} / max {})\nWind: {}m/s\nHumidity: {}%",
                            weather.temperature,
                            weather.temp_min,
                            weather.temp_max,
                            weather.wind_speed,
                            weather.humidity
                        ),
                        Err(e) => {
                            tracing::debug!("Weather fetch failed: {e:?}");
                            println!("{}", AppError::from(e).user_message());
                        }
                    }
                    true
                }
                // Every channel lagged or closed
                else => false,
            }
        })
        .await;

        if !matches!(event, Ok(true)) {
            break;
        }
    }
}

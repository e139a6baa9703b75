use crate::{
    Config,
    error::FetchError,
    model::{WeatherForecast, WeatherObservation},
    provider::cwa::CwaClient,
};
use async_trait::async_trait;

pub mod cwa;

/// The two independent data sources behind the card.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_current_observation(
        &self,
        location_name: &str,
    ) -> Result<WeatherObservation, FetchError>;

    async fn fetch_forecast(&self, location_name: &str) -> Result<WeatherForecast, FetchError>;
}

/// Construct the CWA client from config.
pub fn source_from_config(config: &Config) -> anyhow::Result<CwaClient> {
    let authorization = config.authorization().ok_or_else(|| {
        anyhow::anyhow!(
            "No API authorization token configured.\n\
                 Hint: run `weather-card configure` and enter your CWA token."
        )
    })?;

    let client = CwaClient::new(authorization.to_owned(), config.fetch_timeout())?
        .with_base_url(config.base_url())
        .with_observation_station(config.observation_station());

    Ok(client)
}

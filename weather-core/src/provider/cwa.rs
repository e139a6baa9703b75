use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::instrument;

use crate::{
    error::FetchError,
    model::{WeatherForecast, WeatherObservation},
};

use super::WeatherSource;

pub const CWA_BASE_URL: &str = "https://opendata.cwa.gov.tw/api/v1/rest/datastore";
/// The observation dataset is queried per station; this one sits in New Taipei.
pub const DEFAULT_OBSERVATION_STATION: &str = "中和";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const OBSERVATION_DATASET: &str = "O-A0001-001";
const FORECAST_DATASET: &str = "F-C0032-001";

/// Client for the Central Weather Administration open-data API.
#[derive(Debug, Clone)]
pub struct CwaClient {
    authorization: String,
    observation_station: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl CwaClient {
    pub fn new(authorization: String, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            authorization,
            observation_station: DEFAULT_OBSERVATION_STATION.to_string(),
            base_url: CWA_BASE_URL.to_string(),
            timeout,
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_observation_station(mut self, station: impl Into<String>) -> Self {
        self.observation_station = station.into();
        self
    }

    pub fn observation_station(&self) -> &str {
        &self.observation_station
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        dataset: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.base_url, dataset);

        let res = self
            .http
            .get(&url)
            .query(&[("Authorization", self.authorization.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn transport_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }

    /// Latest observation from the configured station.
    ///
    /// The observation dataset can only be filtered by station, not by
    /// county, so `location_name` does not change which station answers.
    #[instrument(skip(self), level = "debug")]
    pub async fn current_observation(
        &self,
        location_name: &str,
    ) -> Result<WeatherObservation, FetchError> {
        if location_name != self.observation_station {
            tracing::debug!(
                station = %self.observation_station,
                "observation dataset is per-station; using fixed station"
            );
        }

        let parsed: ObsResponse = self
            .get_json(OBSERVATION_DATASET, &[("StationName", self.observation_station.as_str())])
            .await?;

        let station = parsed
            .records
            .station
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::shape("observation response contained no stations"))?;

        let elements = station.weather_element;
        // CWA reports missing readings as -99.
        if !(0.0..=100.0).contains(&elements.relative_humidity) {
            return Err(FetchError::shape(format!(
                "RelativeHumidity is not a percentage: {}",
                elements.relative_humidity
            )));
        }

        Ok(WeatherObservation {
            observation_time: station.obs_time.date_time,
            station_name: station.station_name,
            temperature_c: elements.air_temperature,
            wind_speed_mps: elements.wind_speed,
            humidity_pct: elements.relative_humidity,
        })
    }

    /// 36-hour forecast for a county or city; only the first period is kept.
    #[instrument(skip(self), level = "debug")]
    pub async fn forecast(&self, location_name: &str) -> Result<WeatherForecast, FetchError> {
        let parsed: FcResponse = self
            .get_json(FORECAST_DATASET, &[("locationName", location_name)])
            .await?;

        let location = parsed
            .records
            .location
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::shape("forecast response contained no locations"))?;

        let wx = first_parameter(&location.weather_element, "Wx")?;
        let pop = first_parameter(&location.weather_element, "PoP")?;
        let ci = first_parameter(&location.weather_element, "CI")?;

        let weather_code = wx
            .parameter_value
            .clone()
            .ok_or_else(|| FetchError::shape("Wx element has no parameterValue"))?;

        let rain_possibility_pct = pop
            .parameter_name
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|pct| *pct <= 100)
            .ok_or_else(|| {
                FetchError::shape(format!("PoP is not a percentage: '{}'", pop.parameter_name))
            })?;

        Ok(WeatherForecast {
            area_name: location.location_name,
            description: wx.parameter_name.clone(),
            weather_code,
            rain_possibility_pct,
            comfortability: ci.parameter_name.clone(),
        })
    }
}

#[async_trait]
impl WeatherSource for CwaClient {
    async fn fetch_current_observation(
        &self,
        location_name: &str,
    ) -> Result<WeatherObservation, FetchError> {
        self.current_observation(location_name).await
    }

    async fn fetch_forecast(&self, location_name: &str) -> Result<WeatherForecast, FetchError> {
        self.forecast(location_name).await
    }
}

fn first_parameter<'a>(
    elements: &'a [FcElement],
    code: &str,
) -> Result<&'a FcParameter, FetchError> {
    let element = elements
        .iter()
        .find(|e| e.element_name == code)
        .ok_or_else(|| FetchError::shape(format!("forecast is missing the {code} element")))?;

    element
        .time
        .first()
        .map(|t| &t.parameter)
        .ok_or_else(|| FetchError::shape(format!("{code} element has no time periods")))
}

#[derive(Debug, Deserialize)]
struct ObsResponse {
    records: ObsRecords,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObsRecords {
    station: Vec<ObsStation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObsStation {
    station_name: String,
    obs_time: ObsTime,
    weather_element: ObsElements,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObsTime {
    date_time: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObsElements {
    air_temperature: f64,
    wind_speed: f64,
    relative_humidity: f64,
}

#[derive(Debug, Deserialize)]
struct FcResponse {
    records: FcRecords,
}

#[derive(Debug, Deserialize)]
struct FcRecords {
    location: Vec<FcLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcLocation {
    location_name: String,
    weather_element: Vec<FcElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcElement {
    element_name: String,
    time: Vec<FcTime>,
}

#[derive(Debug, Deserialize)]
struct FcTime {
    parameter: FcParameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcParameter {
    parameter_name: String,
    parameter_value: Option<String>,
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

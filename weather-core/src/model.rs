use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Current conditions reported by a single weather station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub observation_time: DateTime<FixedOffset>,
    pub station_name: String,
    pub temperature_c: f64,
    pub wind_speed_mps: f64,
    pub humidity_pct: f64,
}

impl WeatherObservation {
    /// Zero-valued observation shown before the first fetch settles.
    pub fn placeholder(now: DateTime<FixedOffset>) -> Self {
        Self {
            observation_time: now,
            station_name: String::new(),
            temperature_c: 0.0,
            wind_speed_mps: 0.0,
            humidity_pct: 0.0,
        }
    }
}

/// Near-term forecast for a county or city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WeatherForecast {
    /// Area name as echoed back by the provider.
    pub area_name: String,
    pub description: String,
    /// Provider's weather-phenomenon code, e.g. "1" for clear sky.
    pub weather_code: String,
    pub rain_possibility_pct: u8,
    pub comfortability: String,
}

/// Merged state consumed by presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub location_name: String,
    #[serde(flatten)]
    pub observation: WeatherObservation,
    #[serde(flatten)]
    pub forecast: WeatherForecast,
    pub is_loading: bool,
}

impl ViewModel {
    pub fn placeholder(location_name: impl Into<String>, now: DateTime<FixedOffset>) -> Self {
        Self {
            location_name: location_name.into(),
            observation: WeatherObservation::placeholder(now),
            forecast: WeatherForecast::default(),
            is_loading: true,
        }
    }
}

/// Coarse day/night classification of the current instant at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Moment {
    Day,
    Night,
    #[default]
    Unknown,
}

impl Moment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Moment::Day => "day",
            Moment::Night => "night",
            Moment::Unknown => "unknown",
        }
    }

    /// Styling fallback: an unknown moment renders as day.
    pub fn or_day(self) -> Moment {
        match self {
            Moment::Unknown => Moment::Day,
            other => other,
        }
    }
}

impl std::fmt::Display for Moment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Core library for the weather card.
//!
//! This crate defines:
//! - The CWA data sources behind the card (current observation and forecast)
//! - The aggregator merging both into one view model with a loading flag
//! - The sunrise/sunset lookup deciding between day and night styling
//! - Configuration, including the persisted location
//!
//! It is used by `weather-card-cli`, but has no dependency on any rendering layer.

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod error;
pub mod location;
pub mod model;
pub mod provider;
pub mod sun;

pub use aggregator::{Aggregator, RefreshOutcome, Snapshot};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{FetchError, RefreshError, ValidationError};
pub use location::{DEFAULT_LOCATION, SUPPORTED_LOCATIONS, validate_location};
pub use model::{Moment, ViewModel, WeatherForecast, WeatherObservation};
pub use provider::{WeatherSource, cwa::CwaClient};
pub use sun::{SunTable, SunriseSunsetEntry};

//! Error taxonomy shared by the fetcher, the aggregator and the location form.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single fetch call. Converted at the fragment boundary so that
/// nothing past the fetcher has to deal with transport or parse errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response shape: {0}")]
    Shape(String),
}

impl FetchError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Transport-level failures: the request never produced a usable response.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Status { .. })
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }

    /// Short message for the card's error indicator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Network error. Check your connection.".to_string(),
            Self::Timeout(_) => "The weather service did not answer in time.".to_string(),
            Self::Status { status, .. } => format!("The weather service answered {status}."),
            Self::Shape(_) => "The weather service sent data we could not read.".to_string(),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Shape(err.to_string())
    }
}

/// Rejected user input on the location form. Never reaches the fetcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Saving failed: '{0}' is not a supported location")]
    UnsupportedLocation(String),
}

/// Per-fragment failures of one refresh cycle. At least one side is set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshError {
    pub observation: Option<FetchError>,
    pub forecast: Option<FetchError>,
}

impl RefreshError {
    pub fn is_total(&self) -> bool {
        self.observation.is_some() && self.forecast.is_some()
    }
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.observation, &self.forecast) {
            (Some(obs), Some(fc)) => write!(f, "observation: {obs}; forecast: {fc}"),
            (Some(obs), None) => write!(f, "observation: {obs}"),
            (None, Some(fc)) => write!(f, "forecast: {fc}"),
            (None, None) => f.write_str("no error"),
        }
    }
}

impl std::error::Error for RefreshError {}

//! Sunrise/sunset lookup and the day/night decision built on it.
//!
//! The table has one block per location and one row per calendar date, with
//! times given as local wall-clock `HH:MM`. Lookups are interpreted in the
//! offset of the instant being classified.

use std::{collections::HashMap, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::Deserialize;

use crate::model::Moment;

const BUNDLED_TABLE: &str = include_str!("../data/sunrise-sunset.json");
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SunTime {
    pub data_time: String,
    pub sunrise: String,
    pub sunset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SunriseSunsetEntry {
    pub location_name: String,
    pub time: Vec<SunTime>,
}

/// Read-only sunrise/sunset reference table.
#[derive(Debug, Clone, Default)]
pub struct SunTable {
    // location -> date string -> row
    rows: HashMap<String, HashMap<String, SunTime>>,
    last_date: Option<NaiveDate>,
    outdated_warning: OnceLock<()>,
}

impl SunTable {
    pub fn from_entries(entries: Vec<SunriseSunsetEntry>) -> Self {
        let last_date = entries
            .iter()
            .flat_map(|entry| &entry.time)
            .filter_map(|row| NaiveDate::parse_from_str(&row.data_time, DATE_FORMAT).ok())
            .max();

        let rows = entries
            .into_iter()
            .map(|entry| {
                let by_date = entry
                    .time
                    .into_iter()
                    .map(|row| (row.data_time.clone(), row))
                    .collect();
                (entry.location_name, by_date)
            })
            .collect();

        Self {
            rows,
            last_date,
            outdated_warning: OnceLock::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<SunriseSunsetEntry> =
            serde_json::from_str(json).context("Failed to parse sunrise/sunset table JSON")?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sunrise/sunset table: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid sunrise/sunset table: {}", path.display()))
    }

    /// Table shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_TABLE)
    }

    pub fn contains_location(&self, location_name: &str) -> bool {
        self.rows.contains_key(location_name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest date present in any block.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.last_date
    }

    /// Whether `date` lies after every row of the table.
    pub fn is_outdated_for(&self, date: NaiveDate) -> bool {
        self.last_date.is_some_and(|last| date > last)
    }

    /// Classify `now` at `location_name`. Missing locations, missing dates and
    /// unparsable times all give [`Moment::Unknown`].
    pub fn resolve_moment(&self, location_name: &str, now: DateTime<FixedOffset>) -> Moment {
        let Some(by_date) = self.rows.get(location_name) else {
            tracing::debug!(location = location_name, "no sunrise/sunset block for location");
            return Moment::Unknown;
        };

        let date = now.date_naive();
        let Some(row) = by_date.get(&date.format(DATE_FORMAT).to_string()) else {
            if self.is_outdated_for(date) {
                self.outdated_warning.get_or_init(|| {
                    tracing::warn!(
                        %date,
                        last_date = ?self.last_date,
                        "sunrise/sunset table has run out; point `sun_table` at a newer one"
                    );
                });
            } else {
                tracing::debug!(location = location_name, %date, "no sunrise/sunset row for date");
            }
            return Moment::Unknown;
        };

        let offset = now.offset();
        let (Some(sunrise), Some(sunset)) = (
            instant_on(date, &row.sunrise, offset),
            instant_on(date, &row.sunset, offset),
        ) else {
            tracing::warn!(
                location = location_name,
                sunrise = %row.sunrise,
                sunset = %row.sunset,
                "malformed sunrise/sunset row"
            );
            return Moment::Unknown;
        };

        if sunrise <= now && now <= sunset {
            Moment::Day
        } else {
            Moment::Night
        }
    }
}

fn instant_on(
    date: NaiveDate,
    time: &str,
    offset: &FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
        .ok()?;
    offset.from_local_datetime(&date.and_time(time)).single()
}

use std::fmt::{self, Write};

use weather_card_core::Snapshot;

/// Text rendition of the card.
pub fn card(snapshot: &Snapshot) -> Result<String, fmt::Error> {
    let view = &snapshot.view;
    let obs = &view.observation;
    let fc = &view.forecast;
    let mut out = String::new();

    writeln!(out, "{}  [{}]", view.location_name, snapshot.moment.or_day())?;
    writeln!(out, "{} {}", fc.description, fc.comfortability)?;
    writeln!(out, "{} °C", obs.temperature_c.round())?;
    writeln!(out, "Wind: {} m/s", obs.wind_speed_mps)?;
    writeln!(out, "Rain: {} %", fc.rain_possibility_pct)?;
    writeln!(out, "Humidity: {} %", obs.humidity_pct.round())?;

    let status = if view.is_loading { "refreshing..." } else { "" };
    writeln!(
        out,
        "Last observed: {} ({}) {status}",
        obs.observation_time.format("%H:%M"),
        obs.station_name,
    )?;

    if let Some(err) = &snapshot.last_error {
        for fetch_err in [&err.observation, &err.forecast].into_iter().flatten() {
            writeln!(out, "! {}", fetch_err.user_message())?;
        }
    }

    Ok(out)
}

pub fn to_json(snapshot: &Snapshot) -> serde_json::Value {
    serde_json::json!({
        "view": snapshot.view,
        "moment": snapshot.moment,
        "error": snapshot.last_error.as_ref().map(|e| e.to_string()),
    })
}

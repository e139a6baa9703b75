use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Select, Text};
use tokio::time::{Interval, MissedTickBehavior};
use weather_card_core::{Aggregator, Config, RefreshOutcome, SUPPORTED_LOCATIONS};

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-card", version, about = "Weather card for Taiwan locations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Enter the CWA authorization token and pick a location.
    Configure,

    /// List the locations the card supports.
    Locations,

    /// Save the location the card should show.
    SetLocation {
        /// Location name, e.g. "臺北市".
        name: String,
    },

    /// Fetch and show the card once.
    Show {
        /// Print the merged view model as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Keep the card on screen, refreshing periodically.
    Watch {
        /// Seconds between refreshes.
        #[arg(long, default_value_t = 600)]
        interval: u64,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Locations => {
                let cfg = Config::load()?;
                for line in location_lines(&cfg) {
                    println!("{line}");
                }
                Ok(())
            }
            Command::SetLocation { name } => {
                let mut cfg = Config::load()?;
                cfg.set_location(&name)?;
                cfg.save()?;
                println!("Saved location: {}", cfg.location());
                Ok(())
            }
            Command::Show { json } => show(json).await,
            Command::Watch { interval } => watch(Duration::from_secs(interval.max(1))).await,
        }
    }
}

/// One line per supported location, the saved one marked with `*`.
fn location_lines(cfg: &Config) -> Vec<String> {
    let current = cfg.location();
    SUPPORTED_LOCATIONS
        .iter()
        .map(|name| {
            let marker = if *name == current { "*" } else { " " };
            format!("{marker} {name}")
        })
        .collect()
}

fn configure() -> anyhow::Result<()> {
    let mut cfg = Config::load()?;

    let mut prompt = Text::new("CWA authorization token:");
    if let Some(current) = cfg.authorization() {
        prompt = prompt.with_default(current);
    }
    let token = prompt.prompt().context("Failed to read authorization token")?;
    cfg.set_authorization(token);

    let current = cfg.location();
    let start = SUPPORTED_LOCATIONS
        .iter()
        .position(|name| *name == current)
        .unwrap_or(0);
    let location = Select::new("Location:", SUPPORTED_LOCATIONS.to_vec())
        .with_starting_cursor(start)
        .prompt()
        .context("Failed to read location")?;
    cfg.set_location(location)?;

    cfg.save()?;
    println!("Configuration saved to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn show(json: bool) -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let (aggregator, outcome) = Aggregator::from_config(&cfg)?.mount().await;
    let snapshot = aggregator.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&render::to_json(&snapshot))?);
    } else {
        print!("{}", render::card(&snapshot)?);
    }

    if let RefreshOutcome::Failed(err) = outcome {
        anyhow::bail!("Could not fetch weather data: {err}");
    }
    Ok(())
}

fn refresh_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval(interval);
    // Slow refreshes push the next tick back instead of bunching ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn watch(interval: Duration) -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let aggregator = Arc::new(Aggregator::from_config(&cfg)?);
    let mut updates = aggregator.subscribe();

    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.view.is_loading {
                continue;
            }
            match render::card(&snapshot) {
                Ok(text) => println!("{text}"),
                Err(err) => tracing::warn!(error = %err, "failed to render card"),
            }
        }
    });

    let refresher = {
        let aggregator = Arc::clone(&aggregator);
        async move {
            let mut ticker = refresh_ticker(interval);
            loop {
                ticker.tick().await;
                aggregator.refresh().await;
            }
        }
    };

    tokio::select! {
        _ = refresher => {}
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
    }

    printer.abort();
    Ok(())
}

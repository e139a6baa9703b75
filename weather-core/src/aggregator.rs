//! Merges the two fetch fragments into the card's view model.
//!
//! The aggregator owns a single [`Snapshot`] slot behind a `watch` channel.
//! Every change is published as a whole snapshot, so observers see either the
//! state before a refresh or the state after it, never a half-merged one.
//!
//! Each refresh is tagged with a generation number. Results that arrive after
//! a newer refresh (or a location change) has started are discarded.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    Config,
    clock::{Clock, SystemClock},
    error::{FetchError, RefreshError, ValidationError},
    location::validate_location,
    model::{Moment, ViewModel},
    provider::{WeatherSource, cwa::DEFAULT_TIMEOUT, source_from_config},
    sun::SunTable,
};

/// Everything an observer needs to render the card.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub view: ViewModel,
    pub moment: Moment,
    /// Generation of the most recently started refresh.
    pub generation: u64,
    /// Failures of the last settled refresh, if any.
    pub last_error: Option<RefreshError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Both fragments were applied.
    Updated,
    /// One fragment was applied; the other kept its previous value.
    Partial(RefreshError),
    /// Neither fragment could be fetched; previous data is retained.
    Failed(RefreshError),
    /// A newer refresh started before this one settled; results were dropped.
    Superseded,
}

impl RefreshOutcome {
    pub fn error(&self) -> Option<&RefreshError> {
        match self {
            Self::Partial(err) | Self::Failed(err) => Some(err),
            Self::Updated | Self::Superseded => None,
        }
    }
}

pub struct Aggregator {
    source: Arc<dyn WeatherSource>,
    sun_table: Arc<SunTable>,
    clock: Arc<dyn Clock>,
    fetch_deadline: Duration,
    state: watch::Sender<Snapshot>,
}

impl Aggregator {
    /// Build an aggregator holding the placeholder view. The placeholder
    /// reports `is_loading` until the first refresh settles.
    pub fn new(
        source: Arc<dyn WeatherSource>,
        sun_table: Arc<SunTable>,
        clock: Arc<dyn Clock>,
        location_name: impl Into<String>,
    ) -> Self {
        let location_name = location_name.into();
        let now = clock.now();
        let moment = sun_table.resolve_moment(&location_name, now);
        let (state, _) = watch::channel(Snapshot {
            view: ViewModel::placeholder(location_name, now),
            moment,
            generation: 0,
            last_error: None,
        });

        Self {
            source,
            sun_table,
            clock,
            fetch_deadline: DEFAULT_TIMEOUT,
            state,
        }
    }

    /// Upper bound on each fetch, independent of the source's own timeouts.
    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    /// Wire up the CWA client, sun table and system clock described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let source = source_from_config(config)?;
        let sun_table = config.load_sun_table()?;
        let clock = SystemClock::new(config.utc_offset()?);

        let aggregator = Self::new(
            Arc::new(source),
            Arc::new(sun_table),
            Arc::new(clock),
            config.location(),
        );
        Ok(aggregator.with_fetch_deadline(config.fetch_timeout()))
    }

    /// Run the initial refresh, as done when the card first appears.
    pub async fn mount(self) -> (Self, RefreshOutcome) {
        let outcome = self.refresh().await;
        (self, outcome)
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().clone()
    }

    pub fn location_name(&self) -> String {
        self.state.borrow().view.location_name.clone()
    }

    /// Re-fetch both fragments for the active location and merge them.
    ///
    /// Always settles: `is_loading` is cleared whatever the fetch results,
    /// unless a newer refresh has taken over the slot.
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut generation = 0;
        let mut location_name = String::new();
        self.state.send_modify(|s| {
            s.generation += 1;
            s.view.is_loading = true;
            generation = s.generation;
            location_name = s.view.location_name.clone();
        });

        let mut pending = PendingRefresh {
            state: &self.state,
            generation,
            settled: false,
        };
        tracing::debug!(generation, location = %location_name, "refresh started");

        let (observation, forecast) = tokio::join!(
            self.bounded(self.source.fetch_current_observation(&location_name)),
            self.bounded(self.source.fetch_forecast(&location_name)),
        );

        let now = self.clock.now();
        let sun_table = &self.sun_table;
        let mut outcome = RefreshOutcome::Superseded;

        self.state.send_if_modified(|s| {
            if s.generation != generation {
                return false;
            }

            let mut error = RefreshError::default();
            match observation {
                Ok(obs) => s.view.observation = obs,
                Err(e) => {
                    tracing::warn!(generation, error = %e, "observation fetch failed");
                    error.observation = Some(e);
                }
            }
            match forecast {
                Ok(fc) => s.view.forecast = fc,
                Err(e) => {
                    tracing::warn!(generation, error = %e, "forecast fetch failed");
                    error.forecast = Some(e);
                }
            }

            s.view.is_loading = false;
            s.moment = sun_table.resolve_moment(&s.view.location_name, now);

            outcome = if error.is_total() {
                RefreshOutcome::Failed(error.clone())
            } else if error.observation.is_some() || error.forecast.is_some() {
                RefreshOutcome::Partial(error.clone())
            } else {
                RefreshOutcome::Updated
            };
            s.last_error = outcome.error().cloned();
            true
        });
        pending.settled = true;

        match &outcome {
            RefreshOutcome::Superseded => {
                tracing::debug!(generation, "discarding results of superseded refresh");
            }
            other => tracing::info!(generation, outcome = ?other, "refresh settled"),
        }

        outcome
    }

    /// Switch the active location and refresh for it.
    ///
    /// Invalid names are rejected without touching the state. A valid name
    /// recomputes the moment immediately and invalidates any in-flight refresh.
    pub async fn change_location(&self, input: &str) -> Result<RefreshOutcome, ValidationError> {
        let name = validate_location(input)?;
        let now = self.clock.now();
        let moment = self.sun_table.resolve_moment(&name, now);

        self.state.send_modify(|s| {
            s.generation += 1;
            s.view.location_name = name;
            s.moment = moment;
        });

        Ok(self.refresh().await)
    }

    /// Recompute the moment for the current time and publish it if it moved.
    pub fn recompute_moment(&self) -> Moment {
        let now = self.clock.now();
        let mut moment = Moment::Unknown;
        self.state.send_if_modified(|s| {
            moment = self.sun_table.resolve_moment(&s.view.location_name, now);
            if s.moment == moment {
                return false;
            }
            s.moment = moment;
            true
        });
        moment
    }

    async fn bounded<T>(
        &self,
        fetch: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        tokio::time::timeout(self.fetch_deadline, fetch)
            .await
            .unwrap_or(Err(FetchError::Timeout(self.fetch_deadline)))
    }
}

/// Clears the loading flag if a refresh future is dropped before it settles.
struct PendingRefresh<'a> {
    state: &'a watch::Sender<Snapshot>,
    generation: u64,
    settled: bool,
}

impl Drop for PendingRefresh<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.state.send_if_modified(|s| {
            if s.generation != self.generation || !s.view.is_loading {
                return false;
            }
            s.view.is_loading = false;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{WeatherForecast, WeatherObservation};
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset};
    use std::{collections::VecDeque, sync::Mutex};

    struct Step<T> {
        delay: Duration,
        result: Result<T, FetchError>,
    }

    fn ok<T>(value: T) -> Step<T> {
        Step {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    fn err<T>(error: FetchError) -> Step<T> {
        Step {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    fn slow<T>(delay_ms: u64, value: T) -> Step<T> {
        Step {
            delay: Duration::from_millis(delay_ms),
            result: Ok(value),
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        observations: Mutex<VecDeque<Step<WeatherObservation>>>,
        forecasts: Mutex<VecDeque<Step<WeatherForecast>>>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn push(&self, observation: Step<WeatherObservation>, forecast: Step<WeatherForecast>) {
            self.observations.lock().unwrap().push_back(observation);
            self.forecasts.lock().unwrap().push_back(forecast);
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    async fn play<T>(step: Option<Step<T>>) -> Result<T, FetchError> {
        let step = step.ok_or_else(|| FetchError::Network("script exhausted".into()))?;
        tokio::time::sleep(step.delay).await;
        step.result
    }

    #[async_trait]
    impl WeatherSource for ScriptedSource {
        async fn fetch_current_observation(
            &self,
            location_name: &str,
        ) -> Result<WeatherObservation, FetchError> {
            self.requested.lock().unwrap().push(location_name.to_string());
            let step = self.observations.lock().unwrap().pop_front();
            play(step).await
        }

        async fn fetch_forecast(
            &self,
            _location_name: &str,
        ) -> Result<WeatherForecast, FetchError> {
            let step = self.forecasts.lock().unwrap().pop_front();
            play(step).await
        }
    }

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn table() -> SunTable {
        SunTable::from_json(
            r#"[
                {"locationName": "臺北市", "time": [
                    {"dataTime": "2019-10-02", "sunrise": "05:30", "sunset": "17:30"}
                ]},
                {"locationName": "高雄市", "time": [
                    {"dataTime": "2019-10-02", "sunrise": "05:50", "sunset": "17:40"}
                ]}
            ]"#,
        )
        .unwrap()
    }

    fn observation(temperature_c: f64) -> WeatherObservation {
        WeatherObservation {
            observation_time: at("2019-10-02T09:50:00+08:00"),
            station_name: "中和".to_string(),
            temperature_c,
            wind_speed_mps: 2.1,
            humidity_pct: 70.0,
        }
    }

    fn forecast(comfortability: &str, rain: u8) -> WeatherForecast {
        WeatherForecast {
            area_name: "臺北市".to_string(),
            description: "多雲".to_string(),
            weather_code: "4".to_string(),
            rain_possibility_pct: rain,
            comfortability: comfortability.to_string(),
        }
    }

    fn setup() -> (Arc<ScriptedSource>, Arc<FixedClock>, Aggregator) {
        let source = Arc::new(ScriptedSource::default());
        let clock = Arc::new(FixedClock::new(at("2019-10-02T10:00:00+08:00")));
        let agg = Aggregator::new(source.clone(), Arc::new(table()), clock.clone(), "臺北市")
            .with_fetch_deadline(Duration::from_secs(5));
        (source, clock, agg)
    }

    #[tokio::test]
    async fn placeholder_is_loading_until_first_refresh() {
        let (source, _, agg) = setup();
        let snap = agg.snapshot();
        assert!(snap.view.is_loading);
        assert_eq!(snap.view.observation.temperature_c, 0.0);
        assert_eq!(snap.moment, Moment::Day);

        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));
        let (agg, outcome) = agg.mount().await;
        assert_eq!(outcome, RefreshOutcome::Updated);
        assert!(!agg.snapshot().view.is_loading);
    }

    #[tokio::test]
    async fn both_fragments_are_merged() {
        let (source, _, agg) = setup();
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));

        let outcome = agg.refresh().await;
        let snap = agg.snapshot();

        assert_eq!(outcome, RefreshOutcome::Updated);
        assert_eq!(snap.view.location_name, "臺北市");
        assert_eq!(snap.view.observation, observation(27.0));
        assert_eq!(snap.view.forecast, forecast("舒適", 10));
        assert!(!snap.view.is_loading);
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.last_error, None);
    }

    #[tokio::test]
    async fn failed_observation_keeps_previous_observation() {
        let (source, _, agg) = setup();
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));
        source.push(
            err(FetchError::shape("observation response contained no stations")),
            ok(forecast("悶熱", 60)),
        );

        agg.refresh().await;
        let outcome = agg.refresh().await;
        let snap = agg.snapshot();

        assert!(matches!(outcome, RefreshOutcome::Partial(_)));
        assert_eq!(snap.view.observation, observation(27.0));
        assert_eq!(snap.view.forecast, forecast("悶熱", 60));
        assert!(!snap.view.is_loading);

        let error = snap.last_error.unwrap();
        assert!(error.observation.unwrap().is_shape());
        assert!(error.forecast.is_none());
    }

    #[tokio::test]
    async fn forecast_missing_ci_keeps_previous_comfortability() {
        let (source, _, agg) = setup();
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));
        source.push(
            ok(observation(29.5)),
            err(FetchError::shape("forecast is missing the CI element")),
        );

        agg.refresh().await;
        let outcome = agg.refresh().await;
        let snap = agg.snapshot();

        assert!(matches!(outcome, RefreshOutcome::Partial(_)));
        assert_eq!(snap.view.forecast.comfortability, "舒適");
        assert_eq!(snap.view.observation.temperature_c, 29.5);
    }

    #[tokio::test]
    async fn total_failure_still_settles() {
        let (source, _, agg) = setup();
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));
        source.push(
            err(FetchError::Network("connection reset".into())),
            err(FetchError::Status {
                status: 503,
                body: String::new(),
            }),
        );

        agg.refresh().await;
        let outcome = agg.refresh().await;
        let snap = agg.snapshot();

        match outcome {
            RefreshOutcome::Failed(error) => assert!(error.is_total()),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!snap.view.is_loading);
        assert_eq!(snap.view.observation, observation(27.0));
        assert_eq!(snap.view.forecast, forecast("舒適", 10));
    }

    #[tokio::test]
    async fn error_is_cleared_by_next_successful_refresh() {
        let (source, _, agg) = setup();
        source.push(err(FetchError::Network("down".into())), ok(forecast("舒適", 10)));
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));

        agg.refresh().await;
        assert!(agg.snapshot().last_error.is_some());

        agg.refresh().await;
        assert!(agg.snapshot().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out() {
        let (source, _, agg) = setup();
        source.push(slow(60_000, observation(27.0)), ok(forecast("舒適", 10)));

        let outcome = agg.refresh().await;

        let error = outcome.error().cloned().unwrap();
        assert_eq!(error.observation, Some(FetchError::Timeout(Duration::from_secs(5))));
        assert!(!agg.snapshot().view.is_loading);
        assert_eq!(agg.snapshot().view.forecast, forecast("舒適", 10));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_older_refresh_is_discarded() {
        let (source, _, agg) = setup();
        source.push(slow(100, observation(10.0)), slow(100, forecast("寒冷", 0)));
        source.push(slow(10, observation(20.0)), slow(10, forecast("舒適", 30)));

        let (first, second) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            agg.refresh().await
        });

        assert_eq!(first, RefreshOutcome::Superseded);
        assert_eq!(second, RefreshOutcome::Updated);
        let snap = agg.snapshot();
        assert_eq!(snap.view.observation.temperature_c, 20.0);
        assert_eq!(snap.view.forecast.comfortability, "舒適");
        assert_eq!(snap.generation, 2);
        assert!(!snap.view.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_older_refresh_does_not_clear_loading() {
        let (source, _, agg) = setup();
        source.push(slow(10, observation(10.0)), slow(10, forecast("寒冷", 0)));
        source.push(slow(100, observation(20.0)), slow(100, forecast("舒適", 30)));
        let rx = agg.subscribe();

        let (first, (loading_between, second)) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let refresh = agg.refresh();
            tokio::pin!(refresh);
            // Let the first refresh come back while the second is in flight.
            let loading = tokio::select! {
                _ = &mut refresh => unreachable!("second refresh is slower"),
                _ = tokio::time::sleep(Duration::from_millis(50)) => rx.borrow().view.is_loading,
            };
            (loading, refresh.await)
        });

        assert_eq!(first, RefreshOutcome::Superseded);
        assert!(loading_between);
        assert_eq!(second, RefreshOutcome::Updated);
        assert_eq!(agg.snapshot().view.observation.temperature_c, 20.0);
    }

    fn kaohsiung_forecast() -> WeatherForecast {
        WeatherForecast {
            area_name: "高雄市".to_string(),
            ..forecast("悶熱", 40)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn location_change_supersedes_in_flight_refresh() {
        let (source, _, agg) = setup();
        source.push(slow(100, observation(10.0)), slow(100, forecast("寒冷", 0)));
        source.push(slow(10, observation(30.0)), slow(10, kaohsiung_forecast()));

        let (first, second) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            agg.change_location("高雄市").await
        });

        assert_eq!(first, RefreshOutcome::Superseded);
        assert_eq!(second, Ok(RefreshOutcome::Updated));
        let snap = agg.snapshot();
        assert_eq!(snap.view.location_name, "高雄市");
        assert_eq!(snap.view.observation.temperature_c, 30.0);
        assert_eq!(snap.view.forecast, kaohsiung_forecast());
        assert!(!snap.view.is_loading);
        assert_eq!(source.requested(), vec!["臺北市".to_string(), "高雄市".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_for_old_location_arriving_first_is_dropped() {
        let (source, _, agg) = setup();
        source.push(slow(10, observation(10.0)), slow(10, forecast("寒冷", 0)));
        source.push(slow(100, observation(30.0)), slow(100, kaohsiung_forecast()));

        let (first, second) = tokio::join!(agg.refresh(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            agg.change_location("高雄市").await
        });

        assert_eq!(first, RefreshOutcome::Superseded);
        assert_eq!(second, Ok(RefreshOutcome::Updated));
        let snap = agg.snapshot();
        assert_eq!(snap.view.observation.temperature_c, 30.0);
        assert_eq!(snap.view.forecast.area_name, "高雄市");
        assert!(!snap.view.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_loading_then_settled() {
        let (source, _, agg) = setup();
        source.push(slow(10, observation(27.0)), slow(10, forecast("舒適", 10)));
        let mut rx = agg.subscribe();
        rx.borrow_and_update();

        let observer = async {
            rx.changed().await.unwrap();
            let loading = rx.borrow_and_update().view.is_loading;
            rx.changed().await.unwrap();
            let settled = rx.borrow_and_update().clone();
            (loading, settled)
        };
        let (_, (loading, settled)) = tokio::join!(agg.refresh(), observer);

        assert!(loading);
        assert!(!settled.view.is_loading);
        assert_eq!(settled.view.observation.temperature_c, 27.0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_refresh_clears_loading() {
        let (source, _, agg) = setup();
        source.push(slow(1_000, observation(27.0)), slow(1_000, forecast("舒適", 10)));

        let result = tokio::time::timeout(Duration::from_millis(10), agg.refresh()).await;
        assert!(result.is_err());
        assert!(!agg.snapshot().view.is_loading);
    }

    #[tokio::test]
    async fn change_location_rejects_invalid_names_without_mutation() {
        let (source, _, agg) = setup();
        source.push(ok(observation(27.0)), ok(forecast("舒適", 10)));
        agg.refresh().await;
        let before = agg.snapshot();

        let err = agg.change_location("Springfield").await.unwrap_err();

        assert_eq!(err, ValidationError::UnsupportedLocation("Springfield".into()));
        assert_eq!(agg.snapshot(), before);
        assert_eq!(source.requested(), vec!["臺北市".to_string()]);
    }

    #[tokio::test]
    async fn change_location_recomputes_moment_and_refreshes() {
        let (source, clock, agg) = setup();
        clock.set(at("2019-10-02T05:40:00+08:00"));
        agg.recompute_moment();
        assert_eq!(agg.snapshot().moment, Moment::Day);

        source.push(ok(observation(30.0)), ok(forecast("悶熱", 20)));
        let outcome = agg.change_location("高雄市").await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Updated);
        let snap = agg.snapshot();
        assert_eq!(snap.view.location_name, "高雄市");
        // Kaohsiung's sunrise is 05:50.
        assert_eq!(snap.moment, Moment::Night);
        assert_eq!(source.requested(), vec!["高雄市".to_string()]);
    }

    #[tokio::test]
    async fn location_without_table_rows_is_unknown() {
        let (source, _, agg) = setup();
        source.push(ok(observation(22.0)), ok(forecast("舒適", 0)));

        agg.change_location("花蓮縣").await.unwrap();

        assert_eq!(agg.snapshot().moment, Moment::Unknown);
        assert_eq!(agg.snapshot().moment.or_day(), Moment::Day);
    }

    #[tokio::test]
    async fn moment_follows_the_clock() {
        let (_, clock, agg) = setup();
        assert_eq!(agg.recompute_moment(), Moment::Day);

        clock.set(at("2019-10-02T20:00:00+08:00"));
        assert_eq!(agg.recompute_moment(), Moment::Night);
        assert_eq!(agg.snapshot().moment, Moment::Night);

        clock.set(at("2019-10-03T10:00:00+08:00"));
        assert_eq!(agg.recompute_moment(), Moment::Unknown);
    }
}

use std::sync::Arc;

use cost_client::domain::{AccrualState, Interval};
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use jiff::tz::TimeZone;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    accrual::{
        EnergyAccrualEngine, IntegrationMethod, PowerIntegrationEngine, PowerUnit, RollbackPolicy,
        DEFAULT_CURRENCY,
    },
    aggregator::UtilityAggregator,
    error::AccrualError,
    feeds::FeedState,
    pipeline::{Envelope, PipelineError, Sink},
    schedule::ResetScheduler,
    sensor::energy::{log_skip, EnergySensor},
    sources::{ReadingKind, ReplayRow},
};

const REPLAY_ENERGY_FEED: &str = "replay.energy";
const REPLAY_POWER_FEED: &str = "replay.power";
const REPLAY_PRICE_FEED: &str = "replay.price";

/// Cost and energy of one interval period. `ends_at` is `None` for the
/// period still open when the replay ran out of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub interval: Interval,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
    pub cost: Decimal,
    pub energy_kwh: Decimal,
    pub currency: String,
}

/// Shared handle to the periods produced by a `ReplaySink` run.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport(Arc<Mutex<Vec<PeriodSummary>>>);

impl ReplayReport {
    pub async fn periods(&self) -> Vec<PeriodSummary> {
        self.0.lock().await.clone()
    }
}

/// Drives replayed rows through the accrual engines with a simulated clock:
/// every reset boundary crossed between two rows fires exactly once, before
/// the later row is applied.
pub struct ReplaySink {
    intervals: Vec<Interval>,
    zone: TimeZone,
    rollback: RollbackPolicy,
    integration: IntegrationMethod,
    currency: String,
    report: ReplayReport,
}

impl ReplaySink {
    pub fn new(intervals: Vec<Interval>, zone: TimeZone) -> Self {
        Self {
            intervals,
            zone,
            rollback: RollbackPolicy::default(),
            integration: IntegrationMethod::default(),
            currency: DEFAULT_CURRENCY.to_string(),
            report: ReplayReport::default(),
        }
    }

    pub fn with_rollback(mut self, rollback: RollbackPolicy) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_integration(mut self, integration: IntegrationMethod) -> Self {
        self.integration = integration;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn report(&self) -> ReplayReport {
        self.report.clone()
    }
}

struct EnergyTrack {
    sensor: EnergySensor,
    period_start: OffsetDateTime,
}

struct PowerRollup {
    aggregator: UtilityAggregator,
    scheduler: ResetScheduler,
    energy_baseline: Decimal,
    period_start: OffsetDateTime,
}

enum Replay {
    Energy(Vec<EnergyTrack>),
    Power {
        engine: PowerIntegrationEngine,
        rollups: Vec<PowerRollup>,
    },
}

impl Replay {
    fn start(sink: &ReplaySink, first: &Envelope<ReplayRow>) -> Result<Self, AccrualError> {
        let at = first.observed_at;
        match first.payload.kind {
            ReadingKind::Energy => {
                let tracks = sink
                    .intervals
                    .iter()
                    .map(|&interval| -> Result<EnergyTrack, AccrualError> {
                        let engine = EnergyAccrualEngine::new(
                            REPLAY_ENERGY_FEED,
                            REPLAY_PRICE_FEED,
                            sink.rollback,
                            AccrualState::new(Some(interval), sink.currency.clone()),
                        );
                        let scheduler = ResetScheduler::new(interval, sink.zone.clone(), at)?;
                        Ok(EnergyTrack {
                            sensor: EnergySensor::new(engine, scheduler),
                            period_start: at,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Energy(tracks))
            }
            ReadingKind::Power => {
                let engine = PowerIntegrationEngine::new(
                    REPLAY_POWER_FEED,
                    REPLAY_PRICE_FEED,
                    PowerUnit::from_label(first.payload.unit.as_deref()),
                    sink.integration,
                    AccrualState::new(None, sink.currency.clone()),
                );
                let rollups = sink
                    .intervals
                    .iter()
                    .map(|&interval| -> Result<PowerRollup, AccrualError> {
                        Ok(PowerRollup {
                            aggregator: UtilityAggregator::new(interval, Decimal::ZERO),
                            scheduler: ResetScheduler::new(interval, sink.zone.clone(), at)?,
                            energy_baseline: Decimal::ZERO,
                            period_start: at,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Power { engine, rollups })
            }
        }
    }

    fn apply(
        &mut self,
        env: &Envelope<ReplayRow>,
        currency: &str,
        periods: &mut Vec<PeriodSummary>,
    ) -> Result<(), AccrualError> {
        let at = env.observed_at;
        let value = FeedState::Reported(env.payload.value.to_string());
        let price = FeedState::Reported(env.payload.price.to_string());

        match self {
            Self::Energy(tracks) => {
                for track in tracks {
                    while track.sensor.scheduler().is_due(at) {
                        let boundary = track.sensor.scheduler().next_reset_at();
                        let state = track.sensor.engine().state();
                        periods.push(PeriodSummary {
                            interval: track.sensor.scheduler().interval(),
                            starts_at: track.period_start,
                            ends_at: Some(boundary),
                            cost: state.running_cost,
                            energy_kwh: state.cumulative_energy,
                            currency: currency.to_string(),
                        });
                        track.sensor.fire()?;
                        track.period_start = boundary;
                    }
                    if let Err(e) = track.sensor.on_update(&value, &price) {
                        log_skip(REPLAY_ENERGY_FEED, &e);
                    }
                }
            }
            Self::Power { engine, rollups } => {
                for rollup in rollups.iter_mut() {
                    while rollup.scheduler.is_due(at) {
                        let boundary = rollup.scheduler.next_reset_at();
                        let total = engine.state().running_cost;
                        let energy = engine.state().cumulative_energy;
                        periods.push(PeriodSummary {
                            interval: rollup.aggregator.interval(),
                            starts_at: rollup.period_start,
                            ends_at: Some(boundary),
                            cost: rollup.aggregator.sample(total),
                            energy_kwh: energy.saturating_sub(rollup.energy_baseline),
                            currency: currency.to_string(),
                        });
                        rollup.aggregator.on_reset_boundary(total);
                        rollup.energy_baseline = energy;
                        rollup.scheduler.on_fire()?;
                        rollup.period_start = boundary;
                    }
                }
                if let Err(e) = engine.on_power_update(&value, &price, at) {
                    log_skip(REPLAY_POWER_FEED, &e);
                }
            }
        }
        Ok(())
    }

    fn finish(self, currency: &str, periods: &mut Vec<PeriodSummary>) {
        match self {
            Self::Energy(tracks) => {
                for track in tracks {
                    let state = track.sensor.engine().state();
                    periods.push(PeriodSummary {
                        interval: track.sensor.scheduler().interval(),
                        starts_at: track.period_start,
                        ends_at: None,
                        cost: state.running_cost,
                        energy_kwh: state.cumulative_energy,
                        currency: currency.to_string(),
                    });
                }
            }
            Self::Power { engine, rollups } => {
                for rollup in rollups {
                    periods.push(PeriodSummary {
                        interval: rollup.aggregator.interval(),
                        starts_at: rollup.period_start,
                        ends_at: None,
                        cost: rollup.aggregator.sample(engine.state().running_cost),
                        energy_kwh: engine
                            .state()
                            .cumulative_energy
                            .saturating_sub(rollup.energy_baseline),
                        currency: currency.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<ReplayRow> for ReplaySink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<ReplayRow>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut replay: Option<Replay> = None;
        let mut periods = Vec::new();
        let mut rows: u64 = 0;
        let mut rejected: u64 = 0;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    rejected += 1;
                    tracing::warn!(error = %e, "skipping replay row");
                    continue;
                }
            };

            if replay.is_none() {
                let started =
                    Replay::start(self, &env).map_err(|e| PipelineError::Sink(e.to_string()))?;
                replay = Some(started);
            }
            if let Some(replay) = replay.as_mut() {
                replay
                    .apply(&env, &self.currency, &mut periods)
                    .map_err(|e| PipelineError::Sink(e.to_string()))?;
            }
            rows += 1;
        }

        if let Some(replay) = replay {
            replay.finish(&self.currency, &mut periods);
        }

        tracing::info!(rows, rejected, periods = periods.len(), "replay finished");
        self.report.0.lock().await.extend(periods);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use time::macros::datetime;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn row(
        kind: ReadingKind,
        at: OffsetDateTime,
        value: &str,
        price: &str,
    ) -> Result<Envelope<ReplayRow>, PipelineError> {
        Ok(Envelope {
            payload: ReplayRow {
                kind,
                value: d(value),
                price: d(price),
                unit: None,
            },
            observed_at: at,
        })
    }

    #[tokio::test]
    async fn energy_replay_splits_cost_at_midnight() {
        let sink = ReplaySink::new(vec![Interval::Daily, Interval::Monthly], TimeZone::UTC);
        let report = sink.report();
        let rows = vec![
            row(ReadingKind::Energy, datetime!(2024-05-10 22:00:00 UTC), "50", "0.30"),
            row(ReadingKind::Energy, datetime!(2024-05-10 23:00:00 UTC), "52", "0.30"),
            Err(PipelineError::Transform("dropped".into())),
            row(ReadingKind::Energy, datetime!(2024-05-11 01:00:00 UTC), "53", "0.30"),
        ];

        sink.run(stream::iter(rows)).await.unwrap();
        let periods = report.periods().await;

        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].interval, Interval::Daily);
        assert_eq!(periods[0].ends_at, Some(datetime!(2024-05-11 00:00:00 UTC)));
        assert_eq!(periods[0].cost, d("0.60"));
        assert_eq!(periods[0].energy_kwh, d("2"));

        assert_eq!(periods[1].starts_at, datetime!(2024-05-11 00:00:00 UTC));
        assert_eq!(periods[1].ends_at, None);
        assert_eq!(periods[1].cost, d("0.30"));

        assert_eq!(periods[2].interval, Interval::Monthly);
        assert_eq!(periods[2].cost, d("0.90"));
        assert_eq!(periods[2].energy_kwh, d("3"));
    }

    #[tokio::test]
    async fn long_gap_fires_each_boundary_once() {
        let sink = ReplaySink::new(vec![Interval::Daily], TimeZone::UTC);
        let report = sink.report();
        let rows = vec![
            row(ReadingKind::Energy, datetime!(2024-05-10 12:00:00 UTC), "10", "1"),
            row(ReadingKind::Energy, datetime!(2024-05-13 12:00:00 UTC), "14", "1"),
        ];

        sink.run(stream::iter(rows)).await.unwrap();
        let periods = report.periods().await;

        // Three closed days plus the open one.
        assert_eq!(periods.len(), 4);
        assert!(periods[..3].iter().all(|p| p.cost == Decimal::ZERO));
        assert_eq!(periods[2].ends_at, Some(datetime!(2024-05-13 00:00:00 UTC)));
        assert_eq!(periods[3].cost, d("4"));
    }

    #[tokio::test]
    async fn power_replay_rolls_up_real_time_total() {
        let sink = ReplaySink::new(vec![Interval::Daily], TimeZone::UTC);
        let report = sink.report();
        let rows = vec![
            row(ReadingKind::Power, datetime!(2024-05-10 23:00:00 UTC), "1000", "0.20"),
            row(ReadingKind::Power, datetime!(2024-05-11 00:30:00 UTC), "1000", "0.20"),
            row(ReadingKind::Power, datetime!(2024-05-11 01:00:00 UTC), "1000", "0.20"),
        ];

        sink.run(stream::iter(rows)).await.unwrap();
        let periods = report.periods().await;

        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].cost, Decimal::ZERO);
        assert_eq!(periods[1].cost, d("0.40"));
        assert_eq!(periods[1].energy_kwh, d("2"));
        assert_eq!(periods[1].currency, DEFAULT_CURRENCY);
    }

    #[tokio::test]
    async fn replay_closes_days_at_local_midnight_of_the_zone() {
        let zone = TimeZone::get("Europe/Amsterdam").unwrap();
        let sink = ReplaySink::new(vec![Interval::Daily], zone);
        let report = sink.report();
        let rows = vec![
            row(ReadingKind::Energy, datetime!(2024-03-30 22:00:00 UTC), "10", "1"),
            row(ReadingKind::Energy, datetime!(2024-03-30 22:50:00 UTC), "11", "1"),
            row(ReadingKind::Energy, datetime!(2024-03-31 21:50:00 UTC), "13", "1"),
            row(ReadingKind::Energy, datetime!(2024-03-31 22:10:00 UTC), "14", "1"),
        ];

        sink.run(stream::iter(rows)).await.unwrap();
        let periods = report.periods().await;

        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].ends_at, Some(datetime!(2024-03-31 00:00:00 +1)));
        assert_eq!(periods[0].cost, d("1"));
        // The short spring day closes at midnight summer time.
        assert_eq!(periods[1].ends_at, Some(datetime!(2024-04-01 00:00:00 +2)));
        assert_eq!(periods[1].cost, d("2"));
        assert_eq!(periods[2].cost, d("1"));
    }
}

use std::collections::HashSet;

use cost_client::domain::{Interval, SensorSnapshot};
use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use super::{
    energy::{run_energy_sensor, EnergySensor},
    power::{run_real_time_sensor, run_utility_sensor},
    publish::SensorPublisher,
    CostContext, SensorIdentity,
};
use crate::{
    accrual::{
        restore_state, EnergyAccrualEngine, IntegrationMethod, PowerIntegrationEngine, PowerUnit,
        RollbackPolicy,
    },
    aggregator::UtilityAggregator,
    config::SensorConfig,
    error::AccrualError,
    naming,
    schedule::ResetScheduler,
};

const COMMAND_CAPACITY: usize = 8;

/// Validated sensor configuration: exactly one upstream source per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorPlan {
    Energy {
        energy_feed: String,
        price_feed: String,
        intervals: Vec<Interval>,
        rollback: RollbackPolicy,
    },
    Power {
        power_feed: String,
        price_feed: String,
        intervals: Vec<Interval>,
        integration: IntegrationMethod,
    },
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl SensorPlan {
    pub fn from_config(cfg: &SensorConfig) -> Result<Self, AccrualError> {
        let price_feed = cfg.price_feed.trim();
        if price_feed.is_empty() {
            return Err(AccrualError::Setup("price_feed must be set".to_string()));
        }

        let mut intervals = Vec::with_capacity(cfg.intervals.len());
        for raw in &cfg.intervals {
            let interval: Interval = raw.parse()?;
            if !intervals.contains(&interval) {
                intervals.push(interval);
            }
        }

        match (non_empty(&cfg.energy_feed), non_empty(&cfg.power_feed)) {
            (Some(energy), None) => Ok(Self::Energy {
                energy_feed: energy.to_string(),
                price_feed: price_feed.to_string(),
                intervals,
                rollback: cfg.rollback,
            }),
            (None, Some(power)) => Ok(Self::Power {
                power_feed: power.to_string(),
                price_feed: price_feed.to_string(),
                intervals,
                integration: cfg.integration,
            }),
            (Some(_), Some(_)) => Err(AccrualError::Setup(format!(
                "sensor for price feed '{price_feed}' sets both energy_feed and power_feed, \
                 expected only one"
            ))),
            (None, None) => Err(AccrualError::Setup(format!(
                "sensor for price feed '{price_feed}' needs either energy_feed or power_feed"
            ))),
        }
    }

    pub fn price_feed(&self) -> &str {
        match self {
            Self::Energy { price_feed, .. } | Self::Power { price_feed, .. } => price_feed,
        }
    }

    /// Identities of every sensor this plan creates.
    pub fn identities(&self) -> Vec<SensorIdentity> {
        match self {
            Self::Energy {
                energy_feed,
                price_feed,
                intervals,
                ..
            } => intervals
                .iter()
                .map(|i| energy_identity(energy_feed, price_feed, *i))
                .collect(),
            Self::Power {
                power_feed,
                price_feed,
                intervals,
                ..
            } => std::iter::once(real_time_identity(power_feed, price_feed))
                .chain(intervals.iter().map(|i| utility_identity(power_feed, price_feed, *i)))
                .collect(),
        }
    }
}

fn energy_identity(energy_feed: &str, price_feed: &str, interval: Interval) -> SensorIdentity {
    SensorIdentity {
        key: format!("{price_feed}_{energy_feed}_{interval}_cost"),
        name: naming::interval_sensor_name(energy_feed, interval),
        device: naming::device_name(energy_feed),
    }
}

fn real_time_identity(power_feed: &str, price_feed: &str) -> SensorIdentity {
    SensorIdentity {
        key: format!("{price_feed}_{power_feed}_real_time_cost"),
        name: naming::real_time_sensor_name(power_feed),
        device: naming::device_name(power_feed),
    }
}

fn utility_identity(power_feed: &str, price_feed: &str, interval: Interval) -> SensorIdentity {
    SensorIdentity {
        key: format!("{price_feed}_{power_feed}_{interval}_cost"),
        name: naming::interval_sensor_name(power_feed, interval),
        device: naming::device_name(power_feed),
    }
}

/// Validates every sensor config; any error rejects the whole set.
pub fn plan_sensors(configs: &[SensorConfig]) -> Result<Vec<SensorPlan>, AccrualError> {
    let plans = configs
        .iter()
        .map(SensorPlan::from_config)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    for identity in plans.iter().flat_map(SensorPlan::identities) {
        if !seen.insert(identity.key.clone()) {
            return Err(AccrualError::Setup(format!("duplicate sensor '{}'", identity.key)));
        }
    }

    Ok(plans)
}

async fn load_snapshot(
    ctx: &CostContext,
    key: &str,
) -> Result<Option<SensorSnapshot>, AccrualError> {
    ctx.store
        .load(key)
        .await
        .map_err(|e| AccrualError::Setup(format!("failed to restore '{key}': {e}")))
}

/// A sensor whose state is restored and ready to run.
enum Prepared {
    Energy {
        identity: SensorIdentity,
        sensor: EnergySensor,
        energy_feed: String,
    },
    Power {
        real_time: SensorIdentity,
        engine: PowerIntegrationEngine,
        power_feed: String,
        rollups: Vec<(SensorIdentity, UtilityAggregator, ResetScheduler)>,
    },
}

async fn prepare(
    ctx: &CostContext,
    plan: &SensorPlan,
    now: OffsetDateTime,
) -> Result<Vec<Prepared>, AccrualError> {
    let price_unit = ctx.feeds.unit(plan.price_feed());

    match plan {
        SensorPlan::Energy {
            energy_feed,
            price_feed,
            intervals,
            rollback,
        } => {
            let mut prepared = Vec::with_capacity(intervals.len());
            for interval in intervals {
                let identity = energy_identity(energy_feed, price_feed, *interval);
                let snapshot = load_snapshot(ctx, &identity.key).await?;
                let state =
                    restore_state(snapshot.as_ref(), Some(*interval), price_unit.as_deref());
                let engine = EnergyAccrualEngine::new(
                    energy_feed.clone(),
                    price_feed.clone(),
                    *rollback,
                    state,
                );
                let scheduler = ResetScheduler::new(*interval, ctx.zone.clone(), now)?;

                tracing::debug!(
                    sensor = %identity.key,
                    restored = snapshot.is_some(),
                    next_reset = %scheduler.next_reset_at(),
                    "energy cost sensor prepared"
                );
                prepared.push(Prepared::Energy {
                    identity,
                    sensor: EnergySensor::new(engine, scheduler),
                    energy_feed: energy_feed.clone(),
                });
            }
            Ok(prepared)
        }
        SensorPlan::Power {
            power_feed,
            price_feed,
            intervals,
            integration,
        } => {
            let real_time = real_time_identity(power_feed, price_feed);
            let snapshot = load_snapshot(ctx, &real_time.key).await?;
            let state = restore_state(snapshot.as_ref(), None, price_unit.as_deref());
            let total = state.running_cost;
            let unit = PowerUnit::from_label(ctx.feeds.unit(power_feed).as_deref());
            let engine = PowerIntegrationEngine::new(
                power_feed.clone(),
                price_feed.clone(),
                unit,
                *integration,
                state,
            );

            let mut rollups = Vec::with_capacity(intervals.len());
            for interval in intervals {
                let identity = utility_identity(power_feed, price_feed, *interval);
                let snapshot = load_snapshot(ctx, &identity.key).await?;
                let aggregator = UtilityAggregator::restore(*interval, snapshot.as_ref(), total);
                let scheduler = ResetScheduler::new(*interval, ctx.zone.clone(), now)?;
                rollups.push((identity, aggregator, scheduler));
            }

            Ok(vec![Prepared::Power {
                real_time,
                engine,
                power_feed: power_feed.clone(),
                rollups,
            }])
        }
    }
}

fn registered_publisher(
    ctx: &CostContext,
    identity: SensorIdentity,
) -> (SensorPublisher, mpsc::Receiver<super::SensorCommand>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    ctx.board.register(&identity.key, tx);
    (SensorPublisher::spawn(identity, ctx.board.clone(), ctx.store.clone()), rx)
}

/// Restores and starts every planned sensor.
///
/// All snapshots are loaded before anything is registered, so a failure
/// leaves no sensor running or visible on the board.
pub async fn start_sensors(
    ctx: &CostContext,
    plans: &[SensorPlan],
) -> Result<Vec<JoinHandle<()>>, AccrualError> {
    let now = ctx.clock.now();
    let mut prepared = Vec::new();
    for plan in plans {
        prepared.extend(prepare(ctx, plan, now).await?);
    }

    let mut handles = Vec::new();
    for p in prepared {
        match p {
            Prepared::Energy {
                identity,
                sensor,
                energy_feed,
            } => {
                tracing::info!(
                    sensor = %identity.key,
                    name = %identity.name,
                    "starting energy cost sensor"
                );
                let updates = ctx.feeds.subscribe(&energy_feed);
                let (publisher, commands) = registered_publisher(ctx, identity);
                handles.push(tokio::spawn(run_energy_sensor(
                    ctx.clone(),
                    publisher,
                    sensor,
                    updates,
                    commands,
                )));
            }
            Prepared::Power {
                real_time,
                engine,
                power_feed,
                rollups,
            } => {
                tracing::info!(
                    sensor = %real_time.key,
                    name = %real_time.name,
                    "starting real-time cost sensor"
                );
                let unit = engine.state().unit_label.clone();
                let (totals_tx, totals_rx) = watch::channel(engine.state().running_cost);

                for (identity, aggregator, scheduler) in rollups {
                    tracing::info!(
                        sensor = %identity.key,
                        name = %identity.name,
                        "starting utility cost sensor"
                    );
                    let (publisher, commands) = registered_publisher(ctx, identity);
                    handles.push(tokio::spawn(run_utility_sensor(
                        ctx.clone(),
                        publisher,
                        aggregator,
                        scheduler,
                        unit.clone(),
                        totals_rx.clone(),
                        commands,
                    )));
                }

                let updates = ctx.feeds.subscribe(&power_feed);
                let (publisher, commands) = registered_publisher(ctx, real_time);
                handles.push(tokio::spawn(run_real_time_sensor(
                    ctx.clone(),
                    publisher,
                    engine,
                    totals_tx,
                    updates,
                    commands,
                )));
            }
        }
    }

    Ok(handles)
}

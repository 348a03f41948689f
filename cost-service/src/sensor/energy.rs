use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use cost_client::domain::SensorSnapshot;

use super::{publish::SensorPublisher, CommandError, CostContext, SensorCommand};
use crate::{
    accrual::{state_snapshot, EnergyAccrualEngine, EnergyOutcome},
    error::AccrualError,
    feeds::{FeedState, FeedSubscription},
    schedule::ResetScheduler,
};

/// An energy-counter cost sensor for one interval: accrual engine plus its
/// reset schedule.
#[derive(Debug, Clone)]
pub struct EnergySensor {
    engine: EnergyAccrualEngine,
    scheduler: ResetScheduler,
}

impl EnergySensor {
    pub fn new(engine: EnergyAccrualEngine, scheduler: ResetScheduler) -> Self {
        Self { engine, scheduler }
    }

    pub fn engine(&self) -> &EnergyAccrualEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &ResetScheduler {
        &self.scheduler
    }

    pub fn on_update(
        &mut self,
        energy: &FeedState,
        price: &FeedState,
    ) -> Result<EnergyOutcome, AccrualError> {
        self.engine.on_energy_update(energy, price)
    }

    /// Manual reset: zero the totals, keep the armed boundary.
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Boundary firing: zero the totals and arm the next boundary.
    pub fn fire(&mut self) -> Result<OffsetDateTime, AccrualError> {
        self.engine.reset();
        self.scheduler.on_fire()
    }

    /// Fires if the armed boundary has been reached at `now`.
    pub fn fire_if_due(
        &mut self,
        now: OffsetDateTime,
    ) -> Result<Option<OffsetDateTime>, AccrualError> {
        if self.scheduler.is_due(now) {
            self.fire().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        state_snapshot(self.engine.state())
    }
}

pub(crate) fn log_outcome(sensor: &str, outcome: &EnergyOutcome, unit: &str) {
    match outcome {
        EnergyOutcome::Primed => {
            tracing::debug!(
                sensor,
                "no previous energy reading, initializing with current reading"
            );
        }
        EnergyOutcome::Accrued { energy, cost } => {
            tracing::info!(sensor, %energy, %cost, unit, "energy cost incremented");
        }
        EnergyOutcome::Rebased { previous } => {
            metrics::counter!("cost_counter_rollbacks_total").increment(1);
            tracing::debug!(sensor, %previous, "energy counter rollback, rebasing on new reading");
        }
        EnergyOutcome::MeterReset { previous } => {
            metrics::counter!("cost_counter_rollbacks_total").increment(1);
            tracing::info!(
                sensor,
                %previous,
                "energy counter rollback treated as meter reset, totals zeroed"
            );
        }
    }
}

pub(crate) fn log_skip(sensor: &str, err: &AccrualError) {
    metrics::counter!("cost_feed_updates_skipped_total", "reason" => err.reason()).increment(1);
    match err {
        AccrualError::MalformedReading { .. } => {
            tracing::warn!(sensor, error = %err, "skipping update, reading is not a number");
        }
        AccrualError::Overflow { .. } => {
            tracing::warn!(sensor, error = %err, "skipping update, totals would overflow");
        }
        _ => tracing::debug!(sensor, error = %err, "skipping update, feed unavailable"),
    }
}

pub(crate) async fn run_energy_sensor(
    ctx: CostContext,
    publisher: SensorPublisher,
    mut sensor: EnergySensor,
    mut updates: FeedSubscription,
    mut commands: mpsc::Receiver<SensorCommand>,
) {
    let key = publisher.key().to_string();
    let price_feed = sensor.engine().price_feed().to_string();

    publisher.publish(sensor.snapshot(), Some(sensor.scheduler().next_reset_at()));

    let timer = tokio::time::sleep_until(sensor.scheduler().deadline(ctx.clock.now()));
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            update = updates.next() => {
                let Some(update) = update else {
                    tracing::warn!(sensor = %key, "energy feed subscription ended");
                    break;
                };
                let price = ctx.feeds.current(&price_feed);
                match sensor.on_update(&update.state, &price) {
                    Ok(outcome) => {
                        log_outcome(&key, &outcome, &sensor.engine().state().unit_label);
                        let next_reset = sensor.scheduler().next_reset_at();
                        publisher.publish(sensor.snapshot(), Some(next_reset));
                    }
                    Err(e) => log_skip(&key, &e),
                }
            }
            () = &mut timer => {
                let now = ctx.clock.now();
                match sensor.fire_if_due(now) {
                    Ok(Some(fired)) => {
                        metrics::counter!("cost_resets_total", "kind" => "boundary").increment(1);
                        tracing::info!(
                            sensor = %key,
                            boundary = %fired,
                            next_reset = %sensor.scheduler().next_reset_at(),
                            "interval boundary reached, cost reset"
                        );
                        let next_reset = sensor.scheduler().next_reset_at();
                        publisher.publish(sensor.snapshot(), Some(next_reset));
                    }
                    // Monotonic timer woke before the wall-clock boundary.
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            sensor = %key,
                            error = %e,
                            "cannot schedule next reset, stopping sensor"
                        );
                        break;
                    }
                }
                timer.as_mut().reset(sensor.scheduler().deadline(now));
            }
            Some(command) = commands.recv() => {
                match command {
                    SensorCommand::Reset(reply) => {
                        sensor.reset();
                        metrics::counter!("cost_resets_total", "kind" => "manual").increment(1);
                        tracing::info!(sensor = %key, "manual cost reset");
                        let next_reset = sensor.scheduler().next_reset_at();
                        publisher.publish(sensor.snapshot(), Some(next_reset));
                        let _ = reply.send(Ok::<(), CommandError>(()));
                    }
                }
            }
        }
    }

    ctx.board.unregister(&key);
    tracing::debug!(sensor = %key, "energy cost sensor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::RollbackPolicy;
    use cost_client::domain::{AccrualState, Interval};
    use rust_decimal::Decimal;
    use jiff::tz::TimeZone;
    use time::macros::datetime;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn val(s: &str) -> FeedState {
        FeedState::Reported(s.to_string())
    }

    #[test]
    fn daily_reset_at_midnight_keeps_counter_base() {
        let price = val("0.30");
        let engine = EnergyAccrualEngine::new(
            "sensor.house_energy",
            "sensor.price",
            RollbackPolicy::Rebase,
            AccrualState::new(Some(Interval::Daily), "EUR"),
        );
        let scheduler =
            ResetScheduler::new(Interval::Daily, TimeZone::UTC, datetime!(2024-05-10 12:00:00 UTC))
                .unwrap();
        let mut sensor = EnergySensor::new(engine, scheduler);

        sensor.on_update(&val("50.0"), &price).unwrap();
        assert_eq!(sensor.fire_if_due(datetime!(2024-05-10 23:59:59 UTC)).unwrap(), None);
        sensor.on_update(&val("52.0"), &price).unwrap();
        assert_eq!(sensor.engine().state().running_cost, d("0.60"));

        let fired = sensor.fire_if_due(datetime!(2024-05-11 00:00:00 UTC)).unwrap();
        assert_eq!(fired, Some(datetime!(2024-05-11 00:00:00 UTC)));
        assert_eq!(sensor.engine().state().running_cost, Decimal::ZERO);
        assert_eq!(sensor.engine().state().cumulative_energy, Decimal::ZERO);
        assert_eq!(sensor.engine().state().last_energy_reading, Some(d("52.0")));
        assert_eq!(sensor.scheduler().next_reset_at(), datetime!(2024-05-12 00:00:00 UTC));

        // Same boundary cannot fire twice.
        assert_eq!(sensor.fire_if_due(datetime!(2024-05-11 00:00:00 UTC)).unwrap(), None);

        sensor.on_update(&val("53.0"), &price).unwrap();
        assert_eq!(sensor.engine().state().running_cost, d("0.30"));
        assert_eq!(sensor.engine().state().cumulative_energy, d("1.0"));
    }
}

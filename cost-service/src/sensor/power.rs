use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};

use super::{
    energy::log_skip, publish::SensorPublisher, CommandError, CostContext, SensorCommand,
};
use crate::{
    accrual::{state_snapshot, PowerIntegrationEngine, PowerOutcome, PowerUnit},
    aggregator::UtilityAggregator,
    feeds::FeedSubscription,
    schedule::ResetScheduler,
};

/// Real-time cost of the power path. Never resets; publishes its running
/// total on `totals` for the interval rollups.
pub(crate) async fn run_real_time_sensor(
    ctx: CostContext,
    publisher: SensorPublisher,
    mut engine: PowerIntegrationEngine,
    totals: watch::Sender<Decimal>,
    mut updates: FeedSubscription,
    mut commands: mpsc::Receiver<SensorCommand>,
) {
    let key = publisher.key().to_string();
    let price_feed = engine.price_feed().to_string();
    let power_feed = engine.power_feed().to_string();

    publisher.publish(state_snapshot(engine.state()), None);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            update = updates.next() => {
                let Some(update) = update else {
                    tracing::warn!(sensor = %key, "power feed subscription ended");
                    break;
                };
                let price = ctx.feeds.current(&price_feed);
                engine.set_unit(PowerUnit::from_label(ctx.feeds.unit(&power_feed).as_deref()));
                match engine.on_power_update(&update.state, &price, update.observed_at) {
                    Ok(PowerOutcome::Accrued { energy, cost }) => {
                        tracing::info!(
                            sensor = %key,
                            %energy,
                            %cost,
                            total = %engine.state().running_cost,
                            "real-time energy cost incremented"
                        );
                        totals.send_replace(engine.state().running_cost);
                        publisher.publish(state_snapshot(engine.state()), None);
                    }
                    Ok(PowerOutcome::Primed) => {
                        tracing::debug!(
                            sensor = %key,
                            "first power sample, integration starts with the next one"
                        );
                    }
                    Ok(PowerOutcome::Replaced) => {
                        tracing::debug!(
                            sensor = %key,
                            "power sample at the held timestamp, taking its power"
                        );
                    }
                    Ok(PowerOutcome::Stale) => {
                        metrics::counter!("cost_feed_updates_skipped_total", "reason" => "stale")
                            .increment(1);
                        tracing::debug!(
                            sensor = %key,
                            observed_at = %update.observed_at,
                            "power sample older than the held one, dropped"
                        );
                    }
                    Err(e) => log_skip(&key, &e),
                }
            }
            Some(command) = commands.recv() => {
                match command {
                    SensorCommand::Reset(reply) => {
                        tracing::warn!(
                            sensor = %key,
                            "manual reset refused, interval rollups depend on this total"
                        );
                        let _ = reply.send(Err(CommandError::NotResettable(key.clone())));
                    }
                }
            }
        }
    }

    ctx.board.unregister(&key);
    tracing::debug!(sensor = %key, "real-time cost sensor stopped");
}

/// Interval rollup of the real-time total.
pub(crate) async fn run_utility_sensor(
    ctx: CostContext,
    publisher: SensorPublisher,
    mut aggregator: UtilityAggregator,
    mut scheduler: ResetScheduler,
    unit: String,
    mut totals: watch::Receiver<Decimal>,
    mut commands: mpsc::Receiver<SensorCommand>,
) {
    let key = publisher.key().to_string();
    let publish = |aggregator: &UtilityAggregator, scheduler: &ResetScheduler, total: Decimal| {
        publisher.publish(aggregator.snapshot(total, &unit), Some(scheduler.next_reset_at()));
    };

    publish(&aggregator, &scheduler, *totals.borrow());

    let timer = tokio::time::sleep_until(scheduler.deadline(ctx.clock.now()));
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            changed = totals.changed() => {
                if changed.is_err() {
                    tracing::debug!(sensor = %key, "real-time source stopped");
                    break;
                }
                let total = *totals.borrow_and_update();
                publish(&aggregator, &scheduler, total);
            }
            () = &mut timer => {
                let now = ctx.clock.now();
                if scheduler.is_due(now) {
                    let total = *totals.borrow();
                    aggregator.on_reset_boundary(total);
                    match scheduler.on_fire() {
                        Ok(fired) => {
                            metrics::counter!("cost_resets_total", "kind" => "boundary")
                                .increment(1);
                            tracing::info!(
                                sensor = %key,
                                boundary = %fired,
                                baseline = %total,
                                "interval boundary reached, rollup re-baselined"
                            );
                            publish(&aggregator, &scheduler, total);
                        }
                        Err(e) => {
                            tracing::error!(
                                sensor = %key,
                                error = %e,
                                "cannot schedule next reset, stopping sensor"
                            );
                            break;
                        }
                    }
                }
                timer.as_mut().reset(scheduler.deadline(now));
            }
            Some(command) = commands.recv() => {
                match command {
                    SensorCommand::Reset(reply) => {
                        let total = *totals.borrow();
                        aggregator.on_reset_boundary(total);
                        metrics::counter!("cost_resets_total", "kind" => "manual").increment(1);
                        tracing::info!(sensor = %key, baseline = %total, "manual rollup reset");
                        publish(&aggregator, &scheduler, total);
                        let _ = reply.send(Ok(()));
                    }
                }
            }
        }
    }

    ctx.board.unregister(&key);
    tracing::debug!(
        sensor = %key,
        interval = %aggregator.interval(),
        "utility cost sensor stopped"
    );
}

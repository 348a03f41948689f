use anyhow::{bail, Result};
use cost_client::domain::Interval;
use cost_service::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    schedule::zone_label,
    sinks::ReplaySink,
    sources::{ReplayCsvSource, ReplayRow},
    transform::ReplayValidation,
};
use jiff::tz::TimeZone;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: replay_readings <csv_file_path> [daily|monthly|yearly ...]");
    }
    let file_path = &args[1];

    let intervals = if args.len() > 2 {
        args[2..].iter().map(|a| a.parse::<Interval>()).collect::<Result<Vec<_>, _>>()?
    } else {
        Interval::ALL.to_vec()
    };

    // The zone and the first sensor's policies come from COST_CONFIG when it is set.
    let cfg = if env::var_os("COST_CONFIG").is_some() {
        Some(AppConfig::load()?)
    } else {
        None
    };
    let zone = match &cfg {
        Some(cfg) => cfg.time_zone()?,
        None => TimeZone::system(),
    };
    tracing::info!(zone = zone_label(&zone), "replaying on local calendar");

    let mut sink = ReplaySink::new(intervals, zone);
    if let Some(sensor) = cfg.as_ref().and_then(|c| c.sensors.first()) {
        sink = sink.with_rollback(sensor.rollback).with_integration(sensor.integration);
    }
    let report = sink.report();

    Pipeline::<_, ReplayRow, _>::new(ReplayCsvSource::new(file_path), sink)
        .with_transform(ReplayValidation::default())
        .run()
        .await?;

    for period in report.periods().await {
        println!("{}", serde_json::to_string(&period)?);
    }

    Ok(())
}

use time::{macros::datetime, OffsetDateTime};
use tokio::sync::Mutex;

use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    sources::ReplayRow,
};

/// Pure validation of a single `ReplayRow`.
///
/// Rules:
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
/// - price must be below 1e6 per unit; anything larger is a unit mistake.
pub fn validate_replay_row(env: Envelope<ReplayRow>) -> Result<Envelope<ReplayRow>, PipelineError> {
    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if env.observed_at < min_ts || env.observed_at > max_ts {
        return Err(PipelineError::Transform("timestamp out of allowed range".to_string()));
    }

    if env.payload.price.abs() >= rust_decimal::Decimal::from(1_000_000) {
        return Err(PipelineError::Transform("price out of allowed range".to_string()));
    }

    Ok(env)
}

/// Row validation plus ordering: a row older than the last accepted one is
/// rejected, since the engines only move forward in time.
#[derive(Default)]
pub struct ReplayValidation {
    last_ts: Mutex<Option<OffsetDateTime>>,
}

#[async_trait::async_trait]
impl Transform<ReplayRow, ReplayRow> for ReplayValidation {
    async fn apply(
        &self,
        input: Envelope<ReplayRow>,
    ) -> Result<Envelope<ReplayRow>, PipelineError> {
        let env = match validate_replay_row(input) {
            Ok(env) => env,
            Err(e) => {
                metrics::counter!("validation_replay_rejected_total").increment(1);
                return Err(e);
            }
        };

        let mut last_ts = self.last_ts.lock().await;
        if let Some(last) = *last_ts {
            if env.observed_at < last {
                metrics::counter!("validation_replay_rejected_total").increment(1);
                return Err(PipelineError::Transform(format!(
                    "row at {} is older than previous row at {last}",
                    env.observed_at
                )));
            }
        }
        *last_ts = Some(env.observed_at);
        Ok(env)
    }
}

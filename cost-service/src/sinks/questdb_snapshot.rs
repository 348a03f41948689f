use std::time::Duration;

use cost_client::{db::snapshot_queries, domain::SensorSnapshot};
use sqlx::postgres::PgPool;
use time::OffsetDateTime;

use super::{SnapshotStore, StoreError};

/// Snapshot store on the Postgres wire protocol.
///
/// Keeps one `cost_sensor_snapshots` row per sensor key; each save upserts
/// that row. The table is created by [`PgSnapshotStore::connect`].
pub struct PgSnapshotStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    /// Builds the store and makes sure its table exists.
    pub async fn connect(
        pool: PgPool,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Result<Self, StoreError> {
        snapshot_queries::ensure_snapshot_table(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self::new(pool, max_retries, retry_backoff))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<SensorSnapshot>, StoreError> {
        snapshot_queries::latest_snapshot(&self.pool, key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn save(&self, key: &str, snapshot: &SensorSnapshot) -> Result<(), StoreError> {
        let mut attempt: u32 = 0;
        loop {
            let updated_at = OffsetDateTime::now_utc();
            let res =
                snapshot_queries::upsert_snapshot(&self.pool, key, snapshot, updated_at).await;
            match res {
                Ok(()) => {
                    metrics::counter!("cost_snapshot_writes_total").increment(1);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        sensor = key,
                        attempt,
                        "snapshot write failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, sensor = key, "snapshot write failed, giving up");
                    return Err(StoreError::Backend(e.to_string()));
                }
            }
        }
    }
}

use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{SensorSnapshot, StoredSnapshot};

/// One row per sensor; `sensor_key` is the conflict target of the upsert.
pub const CREATE_SNAPSHOT_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS cost_sensor_snapshots (
        sensor_key TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        attributes TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
"#;

const UPSERT_SNAPSHOT: &str = r#"
    INSERT INTO cost_sensor_snapshots (sensor_key, state, attributes, updated_at)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (sensor_key) DO UPDATE SET
        state = EXCLUDED.state,
        attributes = EXCLUDED.attributes,
        updated_at = EXCLUDED.updated_at
"#;

/// Creates the snapshot table when it does not exist yet.
pub async fn ensure_snapshot_table(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_SNAPSHOT_TABLE).execute(pool).await?;
    Ok(())
}

/// Fetch the stored snapshot for a sensor, if any.
pub async fn latest_snapshot(pool: &PgPool, sensor_key: &str) -> Result<Option<SensorSnapshot>> {
    let row = sqlx::query_as::<_, StoredSnapshot>(
        r#"
        SELECT
            sensor_key,
            state,
            attributes,
            updated_at
        FROM cost_sensor_snapshots
        WHERE sensor_key = $1
        "#,
    )
    .bind(sensor_key)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(row.into_snapshot()?)),
        None => Ok(None),
    }
}

/// Write a sensor's snapshot, replacing the previous one for the same key.
pub async fn upsert_snapshot(
    pool: &PgPool,
    sensor_key: &str,
    snapshot: &SensorSnapshot,
    updated_at: OffsetDateTime,
) -> Result<()> {
    let attributes = serde_json::to_string(&snapshot.attributes)?;

    sqlx::query(UPSERT_SNAPSHOT)
        .bind(sensor_key)
        .bind(&snapshot.state)
        .bind(attributes)
        .bind(updated_at)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn upsert_replaces_the_row_of_the_same_sensor() {
        let sql = squash(UPSERT_SNAPSHOT);
        assert!(sql.contains("ON CONFLICT (sensor_key) DO UPDATE SET"));
        for column in ["state", "attributes", "updated_at"] {
            assert!(sql.contains(&format!("{column} = EXCLUDED.{column}")), "{column} not updated");
        }
    }

    #[test]
    fn sensor_key_is_the_table_key() {
        assert!(squash(CREATE_SNAPSHOT_TABLE).contains("sensor_key TEXT PRIMARY KEY"));
    }
}

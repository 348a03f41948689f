use std::path::{Path, PathBuf};

use cost_client::domain::SensorSnapshot;

use super::{SnapshotStore, StoreError};

/// One JSON document per sensor under `dir`.
///
/// Sensor keys embed feed ids with arbitrary characters, so files are named
/// by the blake3 hash of the key; the key itself is stored in the document.
pub struct JsonFileStore {
    dir: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredDocument {
    sensor_key: String,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: time::OffsetDateTime,
    snapshot: SensorSnapshot,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes());
        self.dir.join(format!("{}.json", hash.to_hex()))
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<SensorSnapshot>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        match serde_json::from_slice::<StoredDocument>(&bytes) {
            Ok(doc) if doc.sensor_key == key => Ok(Some(doc.snapshot)),
            Ok(doc) => {
                tracing::warn!(
                    sensor = key,
                    stored = %doc.sensor_key,
                    "snapshot file belongs to another sensor, ignoring"
                );
                Ok(None)
            }
            Err(e) => {
                // Unreadable snapshots restore as absent rather than blocking startup.
                tracing::warn!(
                    error = %e,
                    sensor = key,
                    path = %path.display(),
                    "corrupt snapshot file, ignoring"
                );
                metrics::counter!("cost_snapshot_corrupt_total").increment(1);
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &str, snapshot: &SensorSnapshot) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Io(format!("failed to create {}: {e}", self.dir.display())))?;

        let doc = StoredDocument {
            sensor_key: key.to_string(),
            updated_at: time::OffsetDateTime::now_utc(),
            snapshot: snapshot.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::Encode(e.to_string()))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Io(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Io(format!("failed to replace {}: {e}", path.display())))?;

        metrics::counter!("cost_snapshot_writes_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cost_client::domain::attr;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cost-service-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn save_then_load_returns_same_snapshot() {
        let store = JsonFileStore::new(scratch_dir("roundtrip"));
        let snap = SensorSnapshot::new("1.95")
            .with_attr(attr::CUMULATIVE_ENERGY, "6.5")
            .with_attr(attr::UNIT, "EUR");

        store.save("sensor.price_sensor.energy_daily_cost", &snap).await.unwrap();
        let loaded = store.load("sensor.price_sensor.energy_daily_cost").await.unwrap();

        assert_eq!(loaded, Some(snap));
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[tokio::test]
    async fn missing_and_corrupt_files_load_as_none() {
        let store = JsonFileStore::new(scratch_dir("corrupt"));
        assert_eq!(store.load("nope").await.unwrap(), None);

        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path_for("bad"), b"{not json").unwrap();
        assert_eq!(store.load("bad").await.unwrap(), None);
        let _ = std::fs::remove_dir_all(store.dir());
    }
}

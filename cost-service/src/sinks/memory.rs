use std::collections::HashMap;

use cost_client::domain::SensorSnapshot;
use tokio::sync::Mutex;

use super::{SnapshotStore, StoreError};

/// Process-local store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, SensorSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, key: &str, snapshot: SensorSnapshot) -> Self {
        self.snapshots.get_mut().insert(key.to_string(), snapshot);
        self
    }

    pub async fn get(&self, key: &str) -> Option<SensorSnapshot> {
        self.snapshots.lock().await.get(key).cloned()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<SensorSnapshot>, StoreError> {
        Ok(self.get(key).await)
    }

    async fn save(&self, key: &str, snapshot: &SensorSnapshot) -> Result<(), StoreError> {
        self.snapshots.lock().await.insert(key.to_string(), snapshot.clone());
        Ok(())
    }
}

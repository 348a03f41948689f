//! Persistence of sensor snapshots.

pub mod json_file;
pub mod memory;
pub mod questdb_snapshot;
pub mod replay;

use cost_client::domain::SensorSnapshot;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use questdb_snapshot::PgSnapshotStore;
pub use replay::ReplaySink;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(String),
    #[error("snapshot encoding error: {0}")]
    Encode(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Read/write contract for the last published output of each sensor.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot for `key`, `None` if nothing usable was stored.
    async fn load(&self, key: &str) -> Result<Option<SensorSnapshot>, StoreError>;

    async fn save(&self, key: &str, snapshot: &SensorSnapshot) -> Result<(), StoreError>;
}

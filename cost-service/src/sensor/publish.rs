use std::sync::Arc;

use cost_client::domain::{attr, SensorSnapshot};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::watch;

use super::{SensorBoard, SensorIdentity};
use crate::sinks::SnapshotStore;

/// Publishes a sensor's output after every mutation.
///
/// The board is updated synchronously. Persistence goes through a
/// latest-value channel drained by a writer task, so the sensor never waits
/// on the store and an outdated snapshot is never written after a newer one.
pub struct SensorPublisher {
    identity: SensorIdentity,
    board: SensorBoard,
    pending: watch::Sender<Option<SensorSnapshot>>,
}

impl SensorPublisher {
    pub fn spawn(
        identity: SensorIdentity,
        board: SensorBoard,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (pending, rx) = watch::channel(None);
        tokio::spawn(run_snapshot_writer(store, identity.key.clone(), rx));
        Self {
            identity,
            board,
            pending,
        }
    }

    pub fn key(&self) -> &str {
        &self.identity.key
    }

    pub fn publish(&self, mut snapshot: SensorSnapshot, next_reset: Option<OffsetDateTime>) {
        if let Some(next) = next_reset.and_then(|t| t.format(&Rfc3339).ok()) {
            snapshot.attributes.insert(attr::NEXT_RESET.to_string(), next.into());
        }
        self.board.publish(&self.identity, snapshot.clone());
        self.pending.send_replace(Some(snapshot));
    }
}

async fn run_snapshot_writer(
    store: Arc<dyn SnapshotStore>,
    key: String,
    mut rx: watch::Receiver<Option<SensorSnapshot>>,
) {
    // Ends once the publisher is dropped and the last value has been seen.
    while rx.changed().await.is_ok() {
        let latest = rx.borrow_and_update().clone();
        let Some(snapshot) = latest else { continue };

        if let Err(e) = store.save(&key, &snapshot).await {
            tracing::warn!(error = %e, sensor = %key, "failed to persist sensor snapshot");
            metrics::counter!("cost_snapshot_write_errors_total").increment(1);
        }
    }
}

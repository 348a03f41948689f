use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use cost_client::domain::SensorSnapshot;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};

use super::{CommandError, SensorCommand, SensorIdentity};

/// Latest published output of one sensor, as exposed to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SensorOutput {
    pub key: String,
    pub name: String,
    pub device: String,
    #[serde(flatten)]
    pub snapshot: SensorSnapshot,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

struct BoardEntry {
    output: Option<SensorOutput>,
    commands: mpsc::Sender<SensorCommand>,
}

/// Registry of running sensors: their latest outputs and command channels.
#[derive(Clone, Default)]
pub struct SensorBoard {
    entries: Arc<RwLock<BTreeMap<String, BoardEntry>>>,
}

impl SensorBoard {
    pub(crate) fn register(&self, key: &str, commands: mpsc::Sender<SensorCommand>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), BoardEntry { output: None, commands });
    }

    pub(crate) fn unregister(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    /// Makes a new output visible immediately.
    pub(crate) fn publish(&self, identity: &SensorIdentity, snapshot: SensorSnapshot) {
        let value = snapshot
            .state
            .parse::<rust_decimal::Decimal>()
            .ok()
            .and_then(|v| v.to_f64());
        if let Some(value) = value {
            metrics::gauge!("cost_sensor_value", "sensor" => identity.key.clone()).set(value);
        }

        let output = SensorOutput {
            key: identity.key.clone(),
            name: identity.name.clone(),
            device: identity.device.clone(),
            snapshot,
            updated_at: OffsetDateTime::now_utc(),
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&identity.key) {
            entry.output = Some(output);
        }
    }

    pub fn get(&self, key: &str) -> Option<SensorOutput> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).and_then(|e| e.output.clone())
    }

    pub fn outputs(&self) -> Vec<SensorOutput> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter_map(|e| e.output.clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    /// Manual "reset now": runs the sensor's reset inside its own task and
    /// waits for it to be applied.
    pub async fn reset(&self, key: &str) -> Result<(), CommandError> {
        let commands = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .get(key)
                .map(|e| e.commands.clone())
                .ok_or_else(|| CommandError::UnknownSensor(key.to_string()))?
        };

        let (tx, rx) = oneshot::channel();
        commands
            .send(SensorCommand::Reset(tx))
            .await
            .map_err(|_| CommandError::Closed(key.to_string()))?;
        rx.await.map_err(|_| CommandError::Closed(key.to_string()))?
    }
}

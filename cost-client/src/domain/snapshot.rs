use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Attribute names of a persisted sensor snapshot.
pub mod attr {
    pub const CUMULATIVE_ENERGY: &str = "cumulative_energy_kwh";
    pub const LAST_ENERGY_READING: &str = "last_energy_reading";
    pub const UNIT: &str = "unit_of_measurement";
    pub const AVERAGE_COST: &str = "average_energy_cost";
    pub const BASELINE: &str = "baseline";
    pub const NEXT_RESET: &str = "next_reset";
}

/// Last published output of a sensor: its state string plus attributes.
///
/// Attributes stay loosely typed at rest; readers validate each field against
/// the expected type and treat anything else as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl SensorSnapshot {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// True when the stored state carries no usable value.
    pub fn is_unknown(&self) -> bool {
        let s = self.state.trim();
        s.is_empty()
            || s.eq_ignore_ascii_case(STATE_UNKNOWN)
            || s.eq_ignore_ascii_case(STATE_UNAVAILABLE)
    }
}

/// Row shape of the `cost_sensor_snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSnapshot {
    pub sensor_key: String,
    pub state: String,
    pub attributes: String,
    pub updated_at: OffsetDateTime,
}

impl StoredSnapshot {
    pub fn into_snapshot(self) -> serde_json::Result<SensorSnapshot> {
        let attributes: Map<String, Value> = if self.attributes.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&self.attributes)?
        };
        Ok(SensorSnapshot {
            state: self.state,
            attributes,
        })
    }
}

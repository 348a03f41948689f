//! Sensor runtime: one task per sensor owns its accrual state and serializes
//! feed updates, boundary firings and manual resets against it.

pub mod board;
pub mod energy;
pub mod power;
pub mod publish;
pub mod setup;

use std::sync::Arc;

use jiff::tz::TimeZone;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    feeds::ValueFeed,
    schedule::{Clock, SystemClock},
    sinks::SnapshotStore,
};

pub use board::{SensorBoard, SensorOutput};
pub use setup::{plan_sensors, start_sensors, SensorPlan};

/// Everything a sensor task needs from its host, passed explicitly at
/// construction.
#[derive(Clone)]
pub struct CostContext {
    pub feeds: Arc<dyn ValueFeed>,
    pub store: Arc<dyn SnapshotStore>,
    pub board: SensorBoard,
    /// Zone whose local calendar defines the reset boundaries.
    pub zone: TimeZone,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
}

impl CostContext {
    pub fn new(feeds: Arc<dyn ValueFeed>, store: Arc<dyn SnapshotStore>, zone: TimeZone) -> Self {
        Self {
            feeds,
            store,
            board: SensorBoard::default(),
            zone,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the wall clock used for boundary checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stops every sensor task. Pending reset timers are dropped with them.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("no sensor named '{0}'")]
    UnknownSensor(String),
    #[error("sensor '{0}' does not support manual reset")]
    NotResettable(String),
    #[error("sensor '{0}' is no longer running")]
    Closed(String),
}

/// Requests handled inside a sensor task.
#[derive(Debug)]
pub enum SensorCommand {
    Reset(oneshot::Sender<Result<(), CommandError>>),
}

/// Sensor identity: stable key, display name and device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    pub key: String,
    pub name: String,
    pub device: String,
}

//! Cost accrual: energy-counter and power-integration engines plus the
//! restore/persist mapping of their state.

pub mod energy;
pub mod power;
pub mod restore;

pub use energy::{EnergyAccrualEngine, EnergyOutcome, RollbackPolicy};
pub use power::{IntegrationMethod, PowerIntegrationEngine, PowerOutcome, PowerUnit};
pub use restore::{restore_state, state_snapshot, DEFAULT_CURRENCY};

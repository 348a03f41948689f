mod accrual_state;
mod interval;
mod snapshot;

pub use accrual_state::AccrualState;
pub use interval::{Interval, UnrecognizedInterval};
pub use snapshot::{attr, SensorSnapshot, StoredSnapshot, STATE_UNAVAILABLE, STATE_UNKNOWN};

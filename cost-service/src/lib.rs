pub mod accrual;
pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod feeds;
pub mod metrics_server;
pub mod naming;
pub mod observability;
pub mod pipeline;
pub mod schedule;
pub mod sensor;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use error::AccrualError;
pub use pipeline::{Envelope, Pipeline};

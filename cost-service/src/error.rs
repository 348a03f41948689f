use cost_client::domain::{Interval, UnrecognizedInterval};

/// Errors raised by the accrual core.
///
/// `FeedUnavailable`, `MalformedReading` and `Overflow` are per-update
/// conditions: the sensor task logs them and skips the update. The remaining variants only
/// occur while constructing sensors and abort setup.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    #[error("feed '{feed}' is unavailable")]
    FeedUnavailable { feed: String },
    #[error("feed '{feed}' reported non-numeric value '{raw}'")]
    MalformedReading { feed: String, raw: String },
    #[error("update from feed '{feed}' does not fit in the accrued totals")]
    Overflow { feed: String },
    #[error(transparent)]
    UnrecognizedInterval(#[from] UnrecognizedInterval),
    #[error("sensor setup failed: {0}")]
    Setup(String),
    #[error("next {0} boundary is outside the supported calendar range")]
    BoundaryOutOfRange(Interval),
}

impl AccrualError {
    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::FeedUnavailable { .. } => "unavailable",
            Self::MalformedReading { .. } => "malformed",
            Self::Overflow { .. } => "overflow",
            Self::UnrecognizedInterval(_) => "interval",
            Self::Setup(_) => "setup",
            Self::BoundaryOutOfRange(_) => "boundary",
        }
    }
}

//! Upstream value feeds (energy counter, power, price).
//!
//! The accrual core never talks to a telemetry system directly: it reads the
//! current [`FeedState`] of a feed and subscribes to its change notifications
//! through the [`ValueFeed`] trait.

pub mod http;
pub mod hub;

use std::{pin::Pin, str::FromStr};

use cost_client::domain::{STATE_UNAVAILABLE, STATE_UNKNOWN};
use futures::Stream;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::error::AccrualError;

pub use hub::FeedHub;

/// Current value of a feed as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// The feed has never reported anything.
    Missing,
    Unknown,
    Unavailable,
    Reported(String),
}

impl FeedState {
    /// Classifies a raw upstream string, mapping the sentinel strings
    /// `unknown`/`unavailable` to their variants.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(STATE_UNKNOWN) {
            Self::Unknown
        } else if trimmed.eq_ignore_ascii_case(STATE_UNAVAILABLE) {
            Self::Unavailable
        } else {
            Self::Reported(raw)
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Reported(_))
    }

    /// Numeric value of the feed.
    pub fn reading(&self, feed: &str) -> Result<Decimal, AccrualError> {
        match self {
            Self::Reported(raw) => parse_decimal(raw).ok_or_else(|| AccrualError::MalformedReading {
                feed: feed.to_string(),
                raw: raw.clone(),
            }),
            _ => Err(AccrualError::FeedUnavailable {
                feed: feed.to_string(),
            }),
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
}

/// Change notification for a single feed.
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub feed_id: String,
    pub state: FeedState,
    pub observed_at: OffsetDateTime,
}

pub type FeedSubscription = Pin<Box<dyn Stream<Item = FeedUpdate> + Send>>;

/// Read/subscribe contract of an upstream telemetry system.
pub trait ValueFeed: Send + Sync {
    fn current(&self, feed_id: &str) -> FeedState;

    /// Unit metadata of the feed, e.g. `EUR/kWh` for a price feed.
    fn unit(&self, feed_id: &str) -> Option<String>;

    /// Stream of updates for `feed_id`. Dropping the stream unsubscribes.
    fn subscribe(&self, feed_id: &str) -> FeedSubscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_strings_map_to_unavailable_variants() {
        assert_eq!(FeedState::from_raw("unknown"), FeedState::Unknown);
        assert_eq!(FeedState::from_raw(" UNAVAILABLE"), FeedState::Unavailable);
        assert_eq!(FeedState::from_raw("12.5"), FeedState::Reported("12.5".to_string()));
    }

    #[test]
    fn reading_parses_plain_and_scientific_numbers() {
        assert_eq!(
            FeedState::Reported("102.5".into()).reading("e").unwrap(),
            Decimal::new(1025, 1)
        );
        assert_eq!(
            FeedState::Reported("1.5e2".into()).reading("e").unwrap(),
            Decimal::new(150, 0)
        );
    }

    #[test]
    fn reading_classifies_failures() {
        assert_eq!(
            FeedState::Unavailable.reading("price"),
            Err(AccrualError::FeedUnavailable { feed: "price".into() })
        );
        assert_eq!(
            FeedState::Missing.reading("price"),
            Err(AccrualError::FeedUnavailable { feed: "price".into() })
        );
        assert!(matches!(
            FeedState::Reported("abc".into()).reading("price"),
            Err(AccrualError::MalformedReading { .. })
        ));
    }
}

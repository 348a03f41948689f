use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::{FeedState, FeedSubscription, FeedUpdate, ValueFeed};

struct FeedEntry {
    state: FeedState,
    unit: Option<String>,
    updated_at: Option<OffsetDateTime>,
    tx: broadcast::Sender<FeedUpdate>,
}

impl FeedEntry {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: FeedState::Missing,
            unit: None,
            updated_at: None,
            tx,
        }
    }
}

/// Snapshot of a feed for diagnostics endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedView {
    pub feed_id: String,
    pub state: Option<String>,
    pub available: bool,
    pub unit: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// In-process feed registry: latest value per feed plus a broadcast channel
/// that fans updates out to every subscribed sensor.
pub struct FeedHub {
    feeds: RwLock<HashMap<String, FeedEntry>>,
    channel_capacity: usize,
}

impl FeedHub {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    /// Records a new value and notifies subscribers.
    ///
    /// A `None` unit keeps the previously reported unit.
    pub fn update(
        &self,
        feed_id: &str,
        state: FeedState,
        unit: Option<String>,
        observed_at: OffsetDateTime,
    ) {
        let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
        let entry = feeds
            .entry(feed_id.to_string())
            .or_insert_with(|| FeedEntry::new(self.channel_capacity));

        entry.state = state.clone();
        if unit.is_some() {
            entry.unit = unit;
        }
        entry.updated_at = Some(observed_at);

        metrics::counter!("cost_feed_updates_total").increment(1);

        // No receivers is fine: nobody is bound to this feed yet.
        let _ = entry.tx.send(FeedUpdate {
            feed_id: feed_id.to_string(),
            state,
            observed_at,
        });
    }

    pub fn view(&self, feed_id: &str) -> Option<FeedView> {
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        feeds.get(feed_id).map(|e| FeedView {
            feed_id: feed_id.to_string(),
            state: match &e.state {
                FeedState::Missing => None,
                FeedState::Unknown => Some("unknown".to_string()),
                FeedState::Unavailable => Some("unavailable".to_string()),
                FeedState::Reported(raw) => Some(raw.clone()),
            },
            available: e.state.is_available(),
            unit: e.unit.clone(),
            updated_at: e.updated_at,
        })
    }
}

impl ValueFeed for FeedHub {
    fn current(&self, feed_id: &str) -> FeedState {
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        feeds
            .get(feed_id)
            .map(|e| e.state.clone())
            .unwrap_or(FeedState::Missing)
    }

    fn unit(&self, feed_id: &str) -> Option<String> {
        let feeds = self.feeds.read().unwrap_or_else(PoisonError::into_inner);
        feeds.get(feed_id).and_then(|e| e.unit.clone())
    }

    fn subscribe(&self, feed_id: &str) -> FeedSubscription {
        let rx = {
            let mut feeds = self.feeds.write().unwrap_or_else(PoisonError::into_inner);
            feeds
                .entry(feed_id.to_string())
                .or_insert_with(|| FeedEntry::new(self.channel_capacity))
                .tx
                .subscribe()
        };

        let feed = feed_id.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let feed = feed.clone();
            async move {
                match item {
                    Ok(update) => Some(update),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            feed = %feed,
                            skipped,
                            "feed subscriber lagged, dropped updates"
                        );
                        metrics::counter!("cost_feed_updates_lagged_total").increment(skipped);
                        None
                    }
                }
            }
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use time::macros::datetime;

    #[test]
    fn unknown_feed_reads_as_missing() {
        let hub = FeedHub::new(8);
        assert_eq!(hub.current("sensor.price"), FeedState::Missing);
        assert_eq!(hub.unit("sensor.price"), None);
    }

    #[test]
    fn unit_is_kept_when_update_omits_it() {
        let hub = FeedHub::new(8);
        let at = datetime!(2024-01-01 00:00:00 UTC);
        hub.update("sensor.price", FeedState::from_raw("0.30"), Some("EUR/kWh".into()), at);
        hub.update("sensor.price", FeedState::from_raw("0.31"), None, at);

        assert_eq!(hub.unit("sensor.price").as_deref(), Some("EUR/kWh"));
        assert_eq!(hub.current("sensor.price"), FeedState::Reported("0.31".into()));
    }

    #[tokio::test]
    async fn subscribers_receive_updates_in_order() {
        let hub = FeedHub::new(8);
        let mut sub = hub.subscribe("sensor.energy");
        let at = datetime!(2024-01-01 00:00:00 UTC);

        hub.update("sensor.energy", FeedState::from_raw("1"), None, at);
        hub.update("sensor.energy", FeedState::from_raw("unavailable"), None, at);

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        assert_eq!(first.state, FeedState::Reported("1".into()));
        assert_eq!(second.state, FeedState::Unavailable);
    }
}

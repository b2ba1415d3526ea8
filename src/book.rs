//! Book manager (§4.4): sharded token -> best-level projection, fed by
//! the stream pool's multiplexed output.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics::Metrics;
use crate::model::{OrderBookSnapshot, PriceLevel};
use crate::shutdown::ShutdownHandle;
use crate::stream::connection::ConnectionMessage;
use crate::wire::{BookSnapshot, InboundMessage, PriceChangeEvent};

/// Change notification emitted on every successful snapshot mutation.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub token_id: String,
}

/// The snapshot map: read-many, one writer task.
#[derive(Clone)]
pub struct BookManager {
    snapshots: Arc<DashMap<String, OrderBookSnapshot>>,
    metrics: Metrics,
}

impl BookManager {
    pub fn new(metrics: Metrics) -> Self {
        Self { snapshots: Arc::new(DashMap::new()), metrics }
    }

    /// A defensive copy of the current snapshot for `token_id`, if one
    /// exists (a full-book message has been received at least once).
    pub fn get(&self, token_id: &str) -> Option<OrderBookSnapshot> {
        self.snapshots.get(token_id).map(|r| r.clone())
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    /// Applies a full book snapshot. Parsing happens before the map is
    /// touched; the lock (shard lock, for `DashMap`) is only held for
    /// the mutation itself (§5, invariant 3).
    pub(crate) fn apply_full_book(&self, snap: &BookSnapshot) -> Option<ChangeNotification> {
        let best_bid = snap.bids.first();
        let best_ask = snap.asks.first();
        let (Some(bid), Some(ask)) = (best_bid, best_ask) else {
            debug!(token_id = %snap.asset_id, "book side empty, skipping snapshot");
            return None;
        };

        let mut new_snapshot = OrderBookSnapshot::new(snap.asset_id.clone());
        new_snapshot.best_bid = Some(PriceLevel { price: bid.price_f64(), size: bid.size_f64() });
        new_snapshot.best_ask = Some(PriceLevel { price: ask.price_f64(), size: ask.size_f64() });

        let wait_start = Instant::now();
        self.snapshots.insert(snap.asset_id.clone(), new_snapshot);
        self.metrics
            .book_lock_wait_seconds
            .with_label_values(&["full_book"])
            .observe(wait_start.elapsed().as_secs_f64());

        Some(ChangeNotification { token_id: snap.asset_id.clone() })
    }

    /// Applies a price-change event, preserving prior size on
    /// size == 0 updates (invariant 2).
    fn apply_price_change(&self, event: &PriceChangeEvent) -> Vec<ChangeNotification> {
        let mut changes = Vec::new();
        for change in &event.price_changes {
            let token_id = change.asset_id.clone();
            let price = change.price.parse::<f64>().unwrap_or(0.0);
            let size = change.size.parse::<f64>().unwrap_or(0.0);
            let is_bid = change.side.eq_ignore_ascii_case("BUY");

            if !self.snapshots.contains_key(&token_id) {
                // No snapshot yet: treat as a full book seeded from this
                // one side; the other side stays unknown until a
                // subsequent message arrives.
                let mut snap = OrderBookSnapshot::new(token_id.clone());
                let level = PriceLevel { price, size };
                if is_bid {
                    snap.best_bid = Some(level);
                } else {
                    snap.best_ask = Some(level);
                }
                self.snapshots.insert(token_id.clone(), snap);
                changes.push(ChangeNotification { token_id: token_id.clone() });
                continue;
            }

            let wait_start = Instant::now();
            if let Some(mut entry) = self.snapshots.get_mut(&token_id) {
                let existing = if is_bid { entry.best_bid } else { entry.best_ask };
                let preserved_size = if size > 0.0 {
                    size
                } else {
                    existing.map(|l| l.size).unwrap_or(0.0)
                };
                let new_level = PriceLevel { price, size: preserved_size };
                if is_bid {
                    entry.best_bid = Some(new_level);
                } else {
                    entry.best_ask = Some(new_level);
                }
                entry.touch();
            }
            self.metrics
                .book_lock_wait_seconds
                .with_label_values(&["price_change"])
                .observe(wait_start.elapsed().as_secs_f64());

            changes.push(ChangeNotification { token_id });
        }
        changes
    }

    fn handle_inbound(&self, msg: InboundMessage) -> Vec<ChangeNotification> {
        match msg {
            InboundMessage::BookBatch(batch) => {
                batch.iter().filter_map(|snap| self.apply_full_book(snap)).collect()
            }
            InboundMessage::Book(snap) => self.apply_full_book(&snap).into_iter().collect(),
            InboundMessage::PriceChange(event) => self.apply_price_change(&event),
            InboundMessage::LastTrade(_) => Vec::new(),
            InboundMessage::TickSizeChange(_) => Vec::new(),
            InboundMessage::Heartbeat => Vec::new(),
            InboundMessage::Unknown(raw) => {
                tracing::warn!(raw = %raw, "undecodable market message");
                Vec::new()
            }
        }
    }

    /// Consumes the pool's multiplexed output on a single task, applying
    /// updates to the snapshot map and forwarding change notifications.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<ConnectionMessage>,
        change_tx: mpsc::Sender<ChangeNotification>,
        shutdown: ShutdownHandle,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                item = inbound.recv() => {
                    let Some(item) = item else { return };
                    for change in self.handle_inbound(item.message) {
                        if change_tx.try_send(change).is_err() {
                            self.metrics.updates_dropped.with_label_values(&["change_channel_full"]).inc();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{PriceChange, WirePriceLevel};

    fn level(price: &str, size: &str) -> WirePriceLevel {
        WirePriceLevel { price: price.to_string(), size: size.to_string() }
    }

    #[test]
    fn full_book_skipped_when_one_side_empty() {
        let manager = BookManager::new(Metrics::new());
        let snap = BookSnapshot {
            event_type: Some("book".into()),
            asset_id: "T".into(),
            market: None,
            timestamp: None,
            bids: vec![],
            asks: vec![level("0.5", "10")],
            hash: None,
        };
        assert!(manager.apply_full_book(&snap).is_none());
        assert!(manager.get("T").is_none());
    }

    #[test]
    fn full_book_overwrites_snapshot() {
        let manager = BookManager::new(Metrics::new());
        let snap = BookSnapshot {
            event_type: Some("book".into()),
            asset_id: "T".into(),
            market: None,
            timestamp: None,
            bids: vec![level("0.50", "100")],
            asks: vec![level("0.52", "80")],
            hash: None,
        };
        manager.apply_full_book(&snap);
        let current = manager.get("T").unwrap();
        assert_eq!(current.best_bid.unwrap().price, 0.50);
        assert_eq!(current.best_ask.unwrap().price, 0.52);
    }

    /// Scenario D: price-change with size=0 preserves the prior size.
    #[test]
    fn price_change_preserves_size_on_zero() {
        let manager = BookManager::new(Metrics::new());
        let snap = BookSnapshot {
            event_type: Some("book".into()),
            asset_id: "T".into(),
            market: None,
            timestamp: None,
            bids: vec![level("0.50", "100")],
            asks: vec![level("0.52", "80")],
            hash: None,
        };
        manager.apply_full_book(&snap);

        let event = PriceChangeEvent {
            event_type: Some("price_change".into()),
            market: None,
            timestamp: None,
            price_changes: vec![
                PriceChange {
                    asset_id: "T".into(),
                    price: "0.49".into(),
                    size: "0".into(),
                    side: "BUY".into(),
                    hash: None,
                    best_bid: None,
                    best_ask: None,
                },
                PriceChange {
                    asset_id: "T".into(),
                    price: "0.53".into(),
                    size: "0".into(),
                    side: "SELL".into(),
                    hash: None,
                    best_bid: None,
                    best_ask: None,
                },
            ],
        };
        manager.apply_price_change(&event);

        let current = manager.get("T").unwrap();
        assert_eq!(current.best_bid.unwrap().price, 0.49);
        assert_eq!(current.best_bid.unwrap().size, 100.0);
        assert_eq!(current.best_ask.unwrap().price, 0.53);
        assert_eq!(current.best_ask.unwrap().size, 80.0);
    }

    #[test]
    fn price_change_overwrites_size_when_positive() {
        let manager = BookManager::new(Metrics::new());
        let snap = BookSnapshot {
            event_type: Some("book".into()),
            asset_id: "T".into(),
            market: None,
            timestamp: None,
            bids: vec![level("0.50", "100")],
            asks: vec![level("0.52", "80")],
            hash: None,
        };
        manager.apply_full_book(&snap);

        let event = PriceChangeEvent {
            event_type: Some("price_change".into()),
            market: None,
            timestamp: None,
            price_changes: vec![PriceChange {
                asset_id: "T".into(),
                price: "0.55".into(),
                size: "40".into(),
                side: "SELL".into(),
                hash: None,
                best_bid: None,
                best_ask: None,
            }],
        };
        manager.apply_price_change(&event);

        let current = manager.get("T").unwrap();
        assert_eq!(current.best_ask.unwrap().size, 40.0);
    }

    #[test]
    fn price_change_without_prior_snapshot_seeds_one_side() {
        let manager = BookManager::new(Metrics::new());
        let event = PriceChangeEvent {
            event_type: Some("price_change".into()),
            market: None,
            timestamp: None,
            price_changes: vec![PriceChange {
                asset_id: "NEW".into(),
                price: "0.30".into(),
                size: "20".into(),
                side: "BUY".into(),
                hash: None,
                best_bid: None,
                best_ask: None,
            }],
        };
        manager.apply_price_change(&event);
        let current = manager.get("NEW").unwrap();
        assert_eq!(current.best_bid.unwrap().price, 0.30);
        assert!(current.best_ask.is_none());
    }
}

//! Detector (§4.5): groups snapshots by market, evaluates complete-set
//! arbitrage, emits opportunities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid_like::next_id;

use crate::book::{BookManager, ChangeNotification};
use crate::catalog::CatalogClient;
use crate::metrics::Metrics;
use crate::model::{Market, Opportunity, OpportunityLeg};
use crate::shutdown::ShutdownHandle;

/// Minimal dependency-free id generator; avoids pulling in a uuid crate
/// for what is, here, just an opaque correlation token.
mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    pub fn next_id() -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("opp-{now:x}-{seq:x}")
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub fee_buffer: f64,
    pub position_cap: f64,
    pub catalog_refresh_interval: Duration,
}

/// `market_id -> outcome index` built from catalog data, refreshed
/// independently of the book manager's hot path.
struct MarketIndex {
    markets: HashMap<String, Market>,
    token_to_market: HashMap<String, String>,
}

impl MarketIndex {
    fn build(markets: Vec<Market>) -> Self {
        let mut token_to_market = HashMap::new();
        let mut by_id = HashMap::new();
        for market in markets {
            for outcome in &market.outcomes {
                token_to_market.insert(outcome.token_id.clone(), market.market_id.clone());
            }
            by_id.insert(market.market_id.clone(), market);
        }
        Self { markets: by_id, token_to_market }
    }
}

pub struct Detector {
    book: BookManager,
    index: Arc<RwLock<MarketIndex>>,
    config: DetectorConfig,
    metrics: Metrics,
}

impl Detector {
    pub fn new(book: BookManager, config: DetectorConfig, metrics: Metrics) -> Self {
        Self { book, index: Arc::new(RwLock::new(MarketIndex::build(Vec::new()))), config, metrics }
    }

    /// Spawns the catalog refresh loop, independent of the hot path.
    pub fn spawn_catalog_refresh(
        &self,
        catalog: Arc<dyn CatalogClient>,
        shutdown: ShutdownHandle,
    ) {
        let index = self.index.clone();
        let interval = self.config.catalog_refresh_interval;
        tokio::spawn(async move {
            loop {
                match catalog.list_markets().await {
                    Ok(markets) => {
                        *index.write() = MarketIndex::build(markets);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "catalog refresh failed");
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = shutdown.interruptible_sleep(interval) => {}
                }
            }
        });
    }

    fn evaluate_market(&self, market: &Market) -> Option<Opportunity> {
        let mut legs = Vec::with_capacity(market.outcomes.len());
        for outcome in &market.outcomes {
            let snapshot = self.book.get(&outcome.token_id)?;
            let ask = snapshot.best_ask?;
            if !ask.price.is_finite() {
                return None;
            }
            legs.push(OpportunityLeg {
                outcome_name: outcome.name.clone(),
                token_id: outcome.token_id.clone(),
                ask_price: ask.price,
                ask_size: ask.size,
                tick_size: outcome.tick_size,
                min_size: outcome.min_size,
            });
        }

        let price_sum: f64 = legs.iter().map(|l| l.ask_price).sum();
        if price_sum >= 1.0 - self.config.fee_buffer {
            return None;
        }

        let max_trade_size = legs
            .iter()
            .map(|l| l.ask_size)
            .fold(f64::INFINITY, f64::min)
            .min(self.config.position_cap);

        let required_min = legs.iter().map(|l| l.min_size).fold(0.0_f64, f64::max);
        if max_trade_size < required_min {
            return None;
        }

        let profit_margin = 1.0 - price_sum;
        let opportunity = Opportunity {
            id: next_id(),
            market_id: market.market_id.clone(),
            slug: market.slug.clone(),
            question: market.question.clone(),
            detected_at_ms: now_millis(),
            legs,
            price_sum,
            profit_margin,
            profit_bps: (profit_margin * 10_000.0).round() as i64,
            max_trade_size,
            expected_gross_profit: max_trade_size * profit_margin,
        };

        if !opportunity.is_valid() {
            return None;
        }
        Some(opportunity)
    }

    /// Consumes change notifications and evaluates the owning market on
    /// every change (the detector itself is stateless between
    /// evaluations).
    pub async fn run(
        self,
        mut changes: mpsc::Receiver<ChangeNotification>,
        opportunities_tx: mpsc::Sender<Opportunity>,
        shutdown: ShutdownHandle,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                item = changes.recv() => {
                    let Some(change) = item else { return };
                    let market_id = {
                        let index = self.index.read();
                        index.token_to_market.get(&change.token_id).cloned()
                    };
                    let Some(market_id) = market_id else { continue };
                    let market = {
                        let index = self.index.read();
                        index.markets.get(&market_id).cloned()
                    };
                    let Some(market) = market else { continue };

                    if let Some(opportunity) = self.evaluate_market(&market) {
                        self.metrics
                            .opportunities_detected
                            .with_label_values(&[&opportunity.market_id])
                            .inc();
                        if opportunities_tx.try_send(opportunity).is_err() {
                            self.metrics
                                .opportunities_skipped
                                .with_label_values(&["opportunity_channel_full"])
                                .inc();
                        }
                    } else {
                        debug!(market_id = %market.market_id, "no opportunity this cycle");
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub fn set_index_for_test(&self, markets: Vec<Market>) {
        *self.index.write() = MarketIndex::build(markets);
    }

    #[cfg(test)]
    pub fn evaluate_market_for_test(&self, market: &Market) -> Option<Opportunity> {
        self.evaluate_market(market)
    }
}

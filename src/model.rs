//! Core domain types: markets, book snapshots, opportunities, fills.
//!
//! These are the process's internal representation — parsed `f64` prices
//! and sizes, never the decimal-string wire shapes (see `wire.rs`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Minimum tokens considered "fully filled" short of the requested amount.
pub const FILL_EPSILON: f64 = 1e-3;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One outcome of a market: a single tradeable token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub token_id: String,
    pub tick_size: f64,
    pub min_size: f64,
}

impl Outcome {
    /// An outcome is eligible for live execution only once it carries a
    /// real token identifier.
    pub fn is_executable(&self) -> bool {
        !self.token_id.is_empty()
    }
}

/// A market: a set of mutually-exclusive outcomes resolving to exactly one
/// winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub slug: String,
    pub question: String,
    pub outcomes: Vec<Outcome>,
}

impl Market {
    pub fn token_ids(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|o| o.token_id.as_str())
    }
}

/// Price + size at the top of one side of a book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// The engine's per-token order-book projection: best bid/ask only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub token_id: String,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub updated_at_ms: i64,
}

impl OrderBookSnapshot {
    pub fn new(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            best_bid: None,
            best_ask: None,
            updated_at_ms: now_millis(),
        }
    }

    /// `0 <= bid <= ask <= 1` whenever both sides are populated.
    pub fn is_consistent(&self) -> bool {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => (0.0..=1.0).contains(&b.price) && b.price <= a.price && a.price <= 1.0,
            _ => true,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = now_millis();
    }
}

/// One outcome leg of a detected opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub outcome_name: String,
    pub token_id: String,
    pub ask_price: f64,
    pub ask_size: f64,
    pub tick_size: f64,
    pub min_size: f64,
}

/// A detected complete-set arbitrage across a market's outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub market_id: String,
    pub slug: String,
    pub question: String,
    pub detected_at_ms: i64,
    pub legs: Vec<OpportunityLeg>,
    pub price_sum: f64,
    pub profit_margin: f64,
    pub profit_bps: i64,
    pub max_trade_size: f64,
    pub expected_gross_profit: f64,
}

impl Opportunity {
    /// `|outcomes| >= 2 && S < 1`, per the invariant every constructed
    /// opportunity must satisfy.
    pub fn is_valid(&self) -> bool {
        self.legs.len() >= 2 && self.price_sum < 1.0
    }
}

/// Per-order fill status as observed by the fill tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillStatus {
    pub order_id: String,
    pub outcome_name: String,
    pub requested: f64,
    pub filled: f64,
    pub avg_price: f64,
    pub status: String,
    pub verified_at_ms: i64,
    pub terminal_error: Option<String>,
}

impl FillStatus {
    pub fn is_fully_filled(&self) -> bool {
        self.filled >= self.requested - FILL_EPSILON
    }
}

/// A single leg's trade record inside a completed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub outcome_name: String,
    pub order_id: String,
    pub filled: f64,
    pub avg_price: f64,
}

/// Outcome of attempting to execute one opportunity end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub executed_at_ms: i64,
    pub order_ids: Vec<String>,
    pub trades: HashMap<String, TradeRecord>,
    pub expected_profit: f64,
    pub realized_profit: Option<f64>,
    pub success: bool,
    pub terminal_error: Option<String>,
}

/// Point-in-time view of the capital circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub enabled: bool,
    pub last_balance: f64,
    pub last_check_ms: i64,
    pub window: Vec<f64>,
    pub disable_threshold: f64,
    pub enable_threshold: f64,
    pub rolling_average: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(price: f64) -> OpportunityLeg {
        OpportunityLeg {
            outcome_name: "Y".into(),
            token_id: "1".into(),
            ask_price: price,
            ask_size: 100.0,
            tick_size: 0.01,
            min_size: 5.0,
        }
    }

    #[test]
    fn opportunity_invalid_when_sum_not_below_one() {
        let opp = Opportunity {
            id: "x".into(),
            market_id: "m".into(),
            slug: "m".into(),
            question: "q".into(),
            detected_at_ms: 0,
            legs: vec![leg(0.5), leg(0.5)],
            price_sum: 1.0,
            profit_margin: 0.0,
            profit_bps: 0,
            max_trade_size: 10.0,
            expected_gross_profit: 0.0,
        };
        assert!(!opp.is_valid());
    }

    #[test]
    fn snapshot_consistency_requires_bid_le_ask() {
        let mut snap = OrderBookSnapshot::new("t");
        snap.best_bid = Some(PriceLevel { price: 0.6, size: 10.0 });
        snap.best_ask = Some(PriceLevel { price: 0.5, size: 10.0 });
        assert!(!snap.is_consistent());
    }

    #[test]
    fn fill_status_epsilon_tolerance() {
        let fs = FillStatus {
            order_id: "o".into(),
            outcome_name: "Y".into(),
            requested: 100.0,
            filled: 99.9995,
            avg_price: 0.5,
            status: "MATCHED".into(),
            verified_at_ms: 0,
            terminal_error: None,
        };
        assert!(fs.is_fully_filled());
    }
}

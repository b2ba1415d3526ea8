//! Fill tracker (§4.7): polls per-order status with exponential
//! backoff until fully filled, timeout, or cancellation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::model::{FillStatus, FILL_EPSILON};
use crate::shutdown::ShutdownHandle;
use crate::wire::OrderQueryResponse;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("order query failed: {0}")]
    RequestFailed(String),
}

/// Delegated order-status polling (§6 Order query; §9 design notes).
#[async_trait]
pub trait OrderQuery: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<OrderQueryResponse, QueryError>;
}

/// An HTTP-backed `OrderQuery` for the `live` mode.
pub struct HttpOrderQuery {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOrderQuery {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }
}

#[async_trait]
impl OrderQuery for HttpOrderQuery {
    async fn get_order(&self, order_id: &str) -> Result<OrderQueryResponse, QueryError> {
        let url = format!("{}/data/order/{}", self.base_url.trim_end_matches('/'), order_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| QueryError::RequestFailed(e.to_string()))?;
        response.json().await.map_err(|e| QueryError::RequestFailed(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct FillRetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub overall_timeout: Duration,
}

/// One leg submitted for fill verification: the order id plus the
/// declared outcome and expected token count (§4.7 inputs).
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub outcome_name: String,
    pub requested: f64,
}

pub enum FillTrackResult {
    /// All legs reached terminal state within the retry loop (every
    /// order either fully filled, or the overall timeout struck and
    /// the remaining unfilled orders were marked timed out).
    Completed(Vec<FillStatus>),
    Cancelled,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Runs the fill-verification loop to completion (§4.7). Independent of
/// the submitting request's lifetime: callers spawn this onto its own
/// task so the originating `execute` call can return immediately.
pub async fn track_fills(
    query: &dyn OrderQuery,
    orders: Vec<TrackedOrder>,
    retry: FillRetryConfig,
    shutdown: &ShutdownHandle,
) -> FillTrackResult {
    let mut statuses: HashMap<String, FillStatus> = orders
        .iter()
        .map(|o| {
            (
                o.order_id.clone(),
                FillStatus {
                    order_id: o.order_id.clone(),
                    outcome_name: o.outcome_name.clone(),
                    requested: o.requested,
                    filled: 0.0,
                    avg_price: 0.0,
                    status: "PENDING".into(),
                    verified_at_ms: now_millis(),
                    terminal_error: None,
                },
            )
        })
        .collect();

    let deadline = Instant::now() + retry.overall_timeout;
    let mut backoff = retry.initial_backoff;

    loop {
        if !shutdown.is_running() {
            return FillTrackResult::Cancelled;
        }

        for order in &orders {
            let already_filled = statuses.get(&order.order_id).map(|s| s.is_fully_filled()).unwrap_or(false);
            if already_filled {
                continue;
            }
            match query.get_order(&order.order_id).await {
                Ok(resp) => {
                    let entry = statuses.get_mut(&order.order_id).expect("seeded above");
                    entry.filled = resp.filled_f64();
                    entry.avg_price = resp.price_f64();
                    entry.status = resp.status;
                    entry.verified_at_ms = now_millis();
                }
                Err(err) => {
                    debug!(order_id = %order.order_id, %err, "transient fill query error, retrying");
                }
            }
        }

        if statuses.values().all(|s| s.is_fully_filled()) {
            return FillTrackResult::Completed(statuses.into_values().collect());
        }

        if Instant::now() >= deadline {
            for status in statuses.values_mut() {
                if !status.is_fully_filled() {
                    status.terminal_error = Some("fill verification timed out".into());
                }
            }
            return FillTrackResult::Completed(statuses.into_values().collect());
        }

        tokio::select! {
            _ = shutdown.cancelled() => return FillTrackResult::Cancelled,
            _ = tokio::time::sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))) => {}
        }
        backoff = backoff.mul_f64(retry.backoff_multiplier).min(retry.max_backoff);
    }
}

/// Realized profit on a confirmed 100%-fill complete set (§4.7).
/// `revenue` is the winning leg's token count (every leg fills to the
/// same count in a valid trade; the winning leg pays exactly 1.0 per
/// token at resolution). Returns `None` (and the caller should record a
/// `partial` outcome) unless every leg is fully filled.
pub fn realized_profit(statuses: &[FillStatus], taker_fee: f64) -> Option<f64> {
    if statuses.is_empty() || !statuses.iter().all(|s| s.is_fully_filled()) {
        return None;
    }
    let cost: f64 = statuses.iter().map(|s| s.filled * s.avg_price).sum();
    let revenue = statuses[0].filled;
    let fees = cost * taker_fee;
    Some(revenue - cost - fees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedQuery {
        responses: Mutex<HashMap<String, Vec<OrderQueryResponse>>>,
    }

    impl ScriptedQuery {
        fn new(scripts: Vec<(&str, Vec<OrderQueryResponse>)>) -> Self {
            let mut responses = HashMap::new();
            for (id, script) in scripts {
                responses.insert(id.to_string(), script);
            }
            Self { responses: Mutex::new(responses) }
        }
    }

    #[async_trait]
    impl OrderQuery for ScriptedQuery {
        async fn get_order(&self, order_id: &str) -> Result<OrderQueryResponse, QueryError> {
            let mut guard = self.responses.lock().unwrap();
            let script = guard.get_mut(order_id).expect("scripted order");
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                Ok(script[0].clone())
            }
        }
    }

    fn resp(status: &str, matched: &str, price: &str) -> OrderQueryResponse {
        OrderQueryResponse {
            order_id: "o".into(),
            status: status.into(),
            asset_id: None,
            price: Some(price.into()),
            original_size: None,
            size_matched: Some(matched.into()),
            side: None,
            order_type: None,
            market: None,
            outcome: None,
            maker_address: None,
        }
    }

    /// Scenario A fill confirmation.
    #[tokio::test]
    async fn scenario_a_full_fill_realized_profit() {
        let query = ScriptedQuery::new(vec![
            ("oy", vec![resp("MATCHED", "150", "0.48")]),
            ("on", vec![resp("MATCHED", "150", "0.50")]),
        ]);
        let orders = vec![
            TrackedOrder { order_id: "oy".into(), outcome_name: "Y".into(), requested: 150.0 },
            TrackedOrder { order_id: "on".into(), outcome_name: "N".into(), requested: 150.0 },
        ];
        let retry = FillRetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            overall_timeout: Duration::from_secs(5),
        };
        let shutdown = ShutdownHandle::new();
        let result = track_fills(&query, orders, retry, &shutdown).await;
        let statuses = match result {
            FillTrackResult::Completed(s) => s,
            FillTrackResult::Cancelled => panic!("should not cancel"),
        };
        let profit = realized_profit(&statuses, 0.01).unwrap();
        assert!((profit - 1.53).abs() < 1e-9, "got {profit}");
    }

    /// Scenario E: partial fill after timeout.
    #[tokio::test]
    async fn scenario_e_partial_fill_after_timeout() {
        let query = ScriptedQuery::new(vec![
            ("oy", vec![resp("MATCHED", "100", "0.49")]),
            ("on", vec![resp("PARTIAL", "50", "0.50")]),
        ]);
        let orders = vec![
            TrackedOrder { order_id: "oy".into(), outcome_name: "Y".into(), requested: 100.0 },
            TrackedOrder { order_id: "on".into(), outcome_name: "N".into(), requested: 100.0 },
        ];
        let retry = FillRetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            overall_timeout: Duration::from_millis(20),
        };
        let shutdown = ShutdownHandle::new();
        let result = track_fills(&query, orders, retry, &shutdown).await;
        let statuses = match result {
            FillTrackResult::Completed(s) => s,
            FillTrackResult::Cancelled => panic!("should not cancel"),
        };
        assert!(realized_profit(&statuses, 0.01).is_none());
        let n_status = statuses.iter().find(|s| s.outcome_name == "N").unwrap();
        assert!(n_status.terminal_error.is_some());
    }

    #[test]
    fn fill_epsilon_tolerance_matches_model() {
        assert!(FILL_EPSILON > 0.0 && FILL_EPSILON < 0.01);
    }
}

//! Executor (§4.6): mode dispatch, aggressive re-pricing, atomic
//! N-leg order submission, asynchronous fill verification.

pub mod errors;
pub mod pricing;
pub mod signer;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::fill_tracker::{self, FillRetryConfig, FillTrackResult, OrderQuery, TrackedOrder};
use crate::metrics::Metrics;
use crate::model::{ExecutionResult, Opportunity, TradeRecord};
use crate::shutdown::ShutdownHandle;
use crate::wire::{OrderEnvelope, OrderSubmissionResult};

pub use errors::{classify_error, message_for, ErrorKind};
pub use pricing::{aggressive_price, round_size, round_to_tick, round_usd, rounding_precision};
pub use signer::{Eip712Signer, OrderSigner, OrderSigningRequest, SignerError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Simulated,
    Live,
}

#[derive(Error, Debug)]
#[error("unknown execution mode: {0}")]
pub struct UnknownModeError(String);

impl FromStr for ExecutionMode {
    type Err = UnknownModeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" => Ok(Self::Simulated),
            "live" => Ok(Self::Live),
            other => Err(UnknownModeError(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("response length {got} did not match request length {want}")]
    LengthMismatch { want: usize, got: usize },
}

/// Delegated batched order submission (§6, §9: an injected capability
/// handle narrowed from the teacher's `TradingClient` to just the
/// batch-submit surface this engine needs).
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit_batch(&self, orders: Vec<OrderEnvelope>) -> Result<Vec<OrderSubmissionResult>, SubmitError>;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// HMAC-SHA256 request signing per §6: `HMAC(secret, ts||method||path||body)`.
fn sign_request(secret_b64: &str, timestamp: u64, method: &str, path: &str, body: &str) -> Result<String, SubmitError> {
    let secret = URL_SAFE
        .decode(secret_b64)
        .map_err(|e| SubmitError::RequestFailed(format!("bad api secret: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&secret)
        .map_err(|e| SubmitError::RequestFailed(format!("hmac init: {e}")))?;
    mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub address: String,
}

/// An `OrderSubmitter` backed by the exchange's batched order-submission
/// endpoint, authenticated per §6 (grounded in the teacher's
/// `PolymarketAuth::l2_headers`).
pub struct HttpOrderSubmitter {
    base_url: String,
    http: reqwest::Client,
    credentials: ApiCredentials,
}

impl HttpOrderSubmitter {
    pub fn new(base_url: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new(), credentials }
    }
}

#[async_trait]
impl OrderSubmitter for HttpOrderSubmitter {
    async fn submit_batch(&self, orders: Vec<OrderEnvelope>) -> Result<Vec<OrderSubmissionResult>, SubmitError> {
        let path = "/order/batch";
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let body = serde_json::to_string(&orders).map_err(|e| SubmitError::RequestFailed(e.to_string()))?;
        let timestamp = now_secs();
        let signature = sign_request(&self.credentials.api_secret, timestamp, "POST", path, &body)?;

        let response = self
            .http
            .post(&url)
            .header("POLY_API_KEY", &self.credentials.api_key)
            .header("POLY_SIGNATURE", signature)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .header("POLY_PASSPHRASE", &self.credentials.passphrase)
            .header("POLY_ADDRESS", &self.credentials.address)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SubmitError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SubmitError::RequestFailed(format!("{status}: {text}")));
        }

        let results: Vec<OrderSubmissionResult> =
            response.json().await.map_err(|e| SubmitError::RequestFailed(e.to_string()))?;

        if results.len() != orders.len() {
            return Err(SubmitError::LengthMismatch { want: orders.len(), got: results.len() });
        }
        Ok(results)
    }
}

/// A submitter that never leaves the process: used by `simulated` mode
/// and tests. Reports every leg as succeeded with a synthetic order id.
pub struct SimulatedSubmitter;

#[async_trait]
impl OrderSubmitter for SimulatedSubmitter {
    async fn submit_batch(&self, orders: Vec<OrderEnvelope>) -> Result<Vec<OrderSubmissionResult>, SubmitError> {
        Ok(orders
            .iter()
            .enumerate()
            .map(|(i, o)| OrderSubmissionResult {
                success: true,
                error_msg: None,
                order_id: Some(format!("sim-{}-{i}", o.order.token_id)),
                order_hashes: Vec::new(),
                status: Some("MATCHED".into()),
                taking_amount: Some(o.order.taker_amount.clone()),
                making_amount: Some(o.order.maker_amount.clone()),
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub mode: ExecutionMode,
    pub aggression_ticks: u32,
    pub taker_fee: f64,
    pub maker_address: String,
    pub taker_address: String,
    pub signature_type: u8,
    pub neg_risk: bool,
    pub fill_retry: FillRetryConfig,
}

/// Opportunity execution: builds orders at the aggressive price,
/// submits atomically, spawns async fill verification (§4.6).
pub struct Executor {
    config: ExecutorConfig,
    signer: Arc<dyn OrderSigner>,
    submitter: Arc<dyn OrderSubmitter>,
    order_query: Arc<dyn OrderQuery>,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
    cumulative_profit: Mutex<f64>,
    nonce_seq: AtomicU64,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        signer: Arc<dyn OrderSigner>,
        submitter: Arc<dyn OrderSubmitter>,
        order_query: Arc<dyn OrderQuery>,
        breaker: Arc<CircuitBreaker>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            signer,
            submitter,
            order_query,
            breaker,
            metrics,
            cumulative_profit: Mutex::new(0.0),
            nonce_seq: AtomicU64::new(0),
        }
    }

    pub fn cumulative_profit(&self) -> f64 {
        *self.cumulative_profit.lock()
    }

    /// Executes one opportunity end-to-end. Returns immediately with
    /// `expected_profit` populated once submission succeeds; fill
    /// verification and realized-profit accounting happen on a
    /// detached task (§4.7).
    pub async fn execute(self: &Arc<Self>, opportunity: Opportunity) -> ExecutionResult {
        let executed_at_ms = now_millis();

        if self.config.mode == ExecutionMode::Live {
            if opportunity.legs.iter().any(|l| l.token_id.is_empty()) {
                self.metrics.executions.with_label_values(&["validation_failed"]).inc();
                return ExecutionResult {
                    opportunity_id: opportunity.id,
                    executed_at_ms,
                    order_ids: Vec::new(),
                    trades: Default::default(),
                    expected_profit: opportunity.expected_gross_profit,
                    realized_profit: None,
                    success: false,
                    terminal_error: Some("missing token id for live execution".into()),
                };
            }
        }

        let mut envelopes = Vec::with_capacity(opportunity.legs.len());
        let mut leg_meta = Vec::with_capacity(opportunity.legs.len());
        for leg in &opportunity.legs {
            let adjusted = aggressive_price(leg.ask_price, leg.tick_size, self.config.aggression_ticks);
            let size = round_size(opportunity.max_trade_size, leg.tick_size);
            if size < leg.min_size {
                self.metrics.executions.with_label_values(&["below_min_size"]).inc();
                return ExecutionResult {
                    opportunity_id: opportunity.id,
                    executed_at_ms,
                    order_ids: Vec::new(),
                    trades: Default::default(),
                    expected_profit: opportunity.expected_gross_profit,
                    realized_profit: None,
                    success: false,
                    terminal_error: Some(format!("rounded size {size} below min_size {}", leg.min_size)),
                };
            }

            if self.config.mode == ExecutionMode::Simulated {
                leg_meta.push((leg.outcome_name.clone(), leg.token_id.clone(), size, adjusted));
                continue;
            }

            let cost_usd = round_usd(size * adjusted, leg.tick_size);
            let nonce = self.nonce_seq.fetch_add(1, Ordering::SeqCst);
            let req = OrderSigningRequest {
                token_id: leg.token_id.clone(),
                price: adjusted,
                size,
                cost_usd,
                maker: self.config.maker_address.clone(),
                taker: self.config.taker_address.clone(),
                fee_rate_bps: (self.config.taker_fee * 10_000.0).round() as u64,
                expiration: 0,
                nonce,
                signature_type: self.config.signature_type,
                neg_risk: self.config.neg_risk,
            };
            let signed = match self.signer.sign(req).await {
                Ok(s) => s,
                Err(err) => {
                    self.metrics.executions.with_label_values(&["signing_failed"]).inc();
                    return ExecutionResult {
                        opportunity_id: opportunity.id,
                        executed_at_ms,
                        order_ids: Vec::new(),
                        trades: Default::default(),
                        expected_profit: opportunity.expected_gross_profit,
                        realized_profit: None,
                        success: false,
                        terminal_error: Some(format!("signing failed: {err}")),
                    };
                }
            };
            envelopes.push(OrderEnvelope { order: signed, owner: self.config.maker_address.clone(), order_type: "GTC" });
            leg_meta.push((leg.outcome_name.clone(), leg.token_id.clone(), size, adjusted));
        }

        if self.config.mode == ExecutionMode::Simulated {
            let expected = opportunity.expected_gross_profit;
            let trades: HashMap<String, TradeRecord> = leg_meta
                .iter()
                .map(|(outcome_name, _token, size, price)| {
                    (
                        outcome_name.clone(),
                        TradeRecord {
                            outcome_name: outcome_name.clone(),
                            order_id: String::new(),
                            filled: *size,
                            avg_price: *price,
                        },
                    )
                })
                .collect();
            self.metrics.executions.with_label_values(&["simulated"]).inc();
            return ExecutionResult {
                opportunity_id: opportunity.id,
                executed_at_ms,
                order_ids: Vec::new(),
                trades,
                expected_profit: expected,
                realized_profit: Some(expected),
                success: true,
                terminal_error: None,
            };
        }

        let submission = self.submitter.submit_batch(envelopes).await;
        let results = match submission {
            Ok(r) => r,
            Err(err) => {
                let kind = classify_error(&err.to_string());
                self.metrics.executions.with_label_values(&[&kind.to_string()]).inc();
                error!(opportunity_id = %opportunity.id, %err, kind = %kind, "order submission failed");
                return ExecutionResult {
                    opportunity_id: opportunity.id,
                    executed_at_ms,
                    order_ids: Vec::new(),
                    trades: Default::default(),
                    expected_profit: opportunity.expected_gross_profit,
                    realized_profit: None,
                    success: false,
                    terminal_error: Some(err.to_string()),
                };
            }
        };

        // Any per-leg failure (success=false, or success=true with no
        // order id) fails the whole opportunity; no partial execution
        // is attempted (§4.6, open question 2: no automatic cleanup of
        // legs that did return ids).
        if let Some(bad) = results.iter().find(|r| !r.success || r.order_id.is_none()) {
            let msg = bad.error_msg.clone().unwrap_or_else(|| "success=true with empty order id".into());
            let kind = classify_error(&msg);
            self.metrics.executions.with_label_values(&[&kind.to_string()]).inc();
            error!(opportunity_id = %opportunity.id, error = %msg, "leg submission failed, whole opportunity failed");
            return ExecutionResult {
                opportunity_id: opportunity.id,
                executed_at_ms,
                order_ids: Vec::new(),
                trades: Default::default(),
                expected_profit: opportunity.expected_gross_profit,
                realized_profit: None,
                success: false,
                terminal_error: Some(msg),
            };
        }

        let order_ids: Vec<String> = results.iter().map(|r| r.order_id.clone().unwrap()).collect();
        // Trade notional recorded in USD, the same units as wallet balance
        // (§9 open question 3), never raw token counts.
        self.breaker.record_trade(opportunity.max_trade_size * opportunity.price_sum);
        self.metrics.executions.with_label_values(&["submitted"]).inc();
        info!(opportunity_id = %opportunity.id, order_ids = ?order_ids, "opportunity submitted, spawning fill verification");

        let tracked: Vec<TrackedOrder> = leg_meta
            .iter()
            .zip(order_ids.iter())
            .map(|((outcome_name, _token, size, _price), order_id)| TrackedOrder {
                order_id: order_id.clone(),
                outcome_name: outcome_name.clone(),
                requested: *size,
            })
            .collect();
        let trades: HashMap<String, TradeRecord> = leg_meta
            .iter()
            .zip(order_ids.iter())
            .map(|((outcome_name, _token, size, price), order_id)| {
                (
                    outcome_name.clone(),
                    TradeRecord {
                        outcome_name: outcome_name.clone(),
                        order_id: order_id.clone(),
                        filled: *size,
                        avg_price: *price,
                    },
                )
            })
            .collect();

        self.spawn_fill_verification(opportunity.id.clone(), tracked, self.clone());

        ExecutionResult {
            opportunity_id: opportunity.id,
            executed_at_ms,
            order_ids,
            trades,
            expected_profit: opportunity.expected_gross_profit,
            realized_profit: None,
            success: true,
            terminal_error: None,
        }
    }

    fn spawn_fill_verification(self: &Arc<Self>, opportunity_id: String, tracked: Vec<TrackedOrder>, this: Arc<Self>) {
        let retry = self.config.fill_retry.clone();
        let query = self.order_query.clone();
        let taker_fee = self.config.taker_fee;
        let shutdown = ShutdownHandle::new(); // fill verification runs in a context independent of the submitting request (§4.7)
        tokio::spawn(async move {
            let result = fill_tracker::track_fills(query.as_ref(), tracked, retry, &shutdown).await;
            match result {
                FillTrackResult::Completed(statuses) => {
                    match fill_tracker::realized_profit(&statuses, taker_fee) {
                        Some(profit) => {
                            let mut cumulative = this.cumulative_profit.lock();
                            *cumulative += profit;
                            this.metrics.cumulative_profit.set(*cumulative);
                            this.metrics.fill_outcomes.with_label_values(&["full"]).inc();
                            info!(opportunity_id = %opportunity_id, profit, "fill confirmed, profit realized");
                        }
                        None => {
                            this.metrics.fill_outcomes.with_label_values(&["partial"]).inc();
                            warn!(opportunity_id = %opportunity_id, "partial fill, realized profit unchanged");
                        }
                    }
                }
                FillTrackResult::Cancelled => {
                    this.metrics.fill_outcomes.with_label_values(&["cancelled"]).inc();
                }
            }
        });
    }

    /// Consumes opportunities in FIFO order, gating intake on the
    /// circuit breaker (§4.8).
    pub async fn run(self: Arc<Self>, mut opportunities: mpsc::Receiver<Opportunity>, shutdown: ShutdownHandle) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                item = opportunities.recv() => {
                    let Some(opportunity) = item else { return };
                    if !self.breaker.is_enabled() {
                        self.metrics.opportunities_skipped.with_label_values(&["circuit_breaker"]).inc();
                        continue;
                    }
                    let result = self.execute(opportunity).await;
                    if !result.success {
                        warn!(opportunity_id = %result.opportunity_id, error = ?result.terminal_error, "opportunity execution failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::fill_tracker::HttpOrderQuery;
    use crate::model::{Opportunity, OpportunityLeg};
    use std::time::Duration;

    fn opp(legs: Vec<OpportunityLeg>) -> Opportunity {
        let price_sum: f64 = legs.iter().map(|l| l.ask_price).sum();
        let max_trade_size = legs.iter().map(|l| l.ask_size).fold(f64::INFINITY, f64::min);
        Opportunity {
            id: "opp-1".into(),
            market_id: "m".into(),
            slug: "m".into(),
            question: "q".into(),
            detected_at_ms: 0,
            legs,
            price_sum,
            profit_margin: 1.0 - price_sum,
            profit_bps: ((1.0 - price_sum) * 10_000.0).round() as i64,
            max_trade_size,
            expected_gross_profit: max_trade_size * (1.0 - price_sum),
        }
    }

    fn leg(name: &str, token: &str, price: f64, size: f64) -> OpportunityLeg {
        OpportunityLeg { outcome_name: name.into(), token_id: token.into(), ask_price: price, ask_size: size, tick_size: 0.01, min_size: 5.0 }
    }

    fn executor(mode: ExecutionMode) -> Arc<Executor> {
        let metrics = Metrics::new();
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerConfig { check_interval: Duration::from_secs(60), trade_multiplier: 3.0, min_absolute: 1.0, hysteresis_ratio: 1.5 },
            metrics.clone(),
        ));
        Arc::new(Executor::new(
            ExecutorConfig {
                mode,
                aggression_ticks: 0,
                taker_fee: 0.01,
                maker_address: "0x0000000000000000000000000000000000000001".into(),
                taker_address: "0x0000000000000000000000000000000000000000".into(),
                signature_type: 0,
                neg_risk: false,
                fill_retry: FillRetryConfig {
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(2),
                    backoff_multiplier: 2.0,
                    overall_timeout: Duration::from_millis(20),
                },
            },
            Arc::new(Eip712Signer::new("0x1234567890123456789012345678901234567890123456789012345678901234", 137).unwrap()),
            Arc::new(SimulatedSubmitter),
            Arc::new(HttpOrderQuery::new("https://example.invalid")),
            breaker,
            metrics,
        ))
    }

    #[tokio::test]
    async fn simulated_mode_never_calls_submitter() {
        let exec = executor(ExecutionMode::Simulated);
        let opportunity = opp(vec![leg("Y", "", 0.48, 200.0), leg("N", "", 0.50, 150.0)]);
        let result = exec.execute(opportunity).await;
        assert!(result.success);
        assert!((result.expected_profit - 3.0).abs() < 1e-6);
        assert_eq!(result.realized_profit, Some(result.expected_profit));
    }

    #[tokio::test]
    async fn trades_record_one_entry_per_outcome() {
        let exec = executor(ExecutionMode::Simulated);
        let opportunity = opp(vec![leg("Y", "", 0.48, 200.0), leg("N", "", 0.50, 150.0)]);
        let result = exec.execute(opportunity).await;
        assert_eq!(result.trades.len(), 2);
        let y = result.trades.get("Y").unwrap();
        assert!((y.avg_price - 0.48).abs() < 1e-9);
        assert!((y.filled - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn live_mode_rejects_empty_token_id() {
        let exec = executor(ExecutionMode::Live);
        let opportunity = opp(vec![leg("Y", "", 0.48, 200.0), leg("N", "tok-n", 0.50, 150.0)]);
        let result = exec.execute(opportunity).await;
        assert!(!result.success);
        assert!(result.order_ids.is_empty());
    }

    #[tokio::test]
    async fn below_min_size_fails_before_submission() {
        let exec = executor(ExecutionMode::Live);
        let opportunity = opp(vec![leg("Y", "tok-y", 0.48, 2.0), leg("N", "tok-n", 0.50, 150.0)]);
        let result = exec.execute(opportunity).await;
        assert!(!result.success);
    }
}

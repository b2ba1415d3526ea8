//! Capital circuit breaker (§4.8): hysteresis-gated execution, grounded
//! in the teacher's `BalanceManager` (`infrastructure/balance_manager.rs`)
//! generalized from a fixed-percentage high-watermark rule to a rolling-
//! average, hysteresis-threshold rule per spec.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::model::BreakerStatus;
use crate::shutdown::ShutdownHandle;
use crate::wallet::{WalletBalanceReader, WalletError};

const WINDOW_CAPACITY: usize = 20;

#[derive(Error, Debug)]
pub enum BreakerError {
    #[error("balance read failed: {0}")]
    BalanceRead(#[from] WalletError),
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub check_interval: Duration,
    pub trade_multiplier: f64,
    pub min_absolute: f64,
    pub hysteresis_ratio: f64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The ring of recent trade sizes plus the last observed balance —
/// everything `record_trade`/`check_balance` must touch together.
struct Inner {
    window: VecDeque<f64>,
    last_balance: f64,
    last_check_ms: i64,
}

/// Hysteresis-based supervisor gating the executor's opportunity
/// intake (§4.8). The enabled flag is a lock-free atomic so
/// `is_enabled` never contends with `record_trade`/`check_balance`;
/// the ring and last-observed balance share one mutex, held only for
/// the mutation region.
pub struct CircuitBreaker {
    config: BreakerConfig,
    enabled: AtomicBool,
    inner: Mutex<Inner>,
    metrics: Metrics,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, metrics: Metrics) -> Self {
        metrics.breaker_enabled.with_label_values(&["default"]).set(1.0);
        Self {
            config,
            enabled: AtomicBool::new(true),
            inner: Mutex::new(Inner { window: VecDeque::with_capacity(WINDOW_CAPACITY), last_balance: 0.0, last_check_ms: 0 }),
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Pushes a USD trade notional into the ring, evicting the oldest
    /// entry past `WINDOW_CAPACITY` (invariant 7). Thresholds are
    /// recomputed lazily on the next `status`/`check_balance` call.
    pub fn record_trade(&self, usd_size: f64) {
        let mut inner = self.inner.lock();
        if inner.window.len() == WINDOW_CAPACITY {
            inner.window.pop_front();
        }
        inner.window.push_back(usd_size);
    }

    /// `disable = max(avg * trade_multiplier, min_absolute)`,
    /// `enable = disable * hysteresis_ratio`; `disable = min_absolute`
    /// when the window is empty (invariant 7).
    fn thresholds_locked(&self, inner: &Inner) -> (f64, f64, f64) {
        let avg = if inner.window.is_empty() {
            0.0
        } else {
            inner.window.iter().sum::<f64>() / inner.window.len() as f64
        };
        let disable = (avg * self.config.trade_multiplier).max(self.config.min_absolute);
        let enable = disable * self.config.hysteresis_ratio;
        (disable, enable, avg)
    }

    /// Reads the current balance and applies the state transition rule
    /// (§4.8, invariant 8): strict `<` at the disable boundary,
    /// non-strict `>=` at the enable boundary. A transient read error
    /// surfaces to the caller and leaves state unchanged.
    pub async fn check_balance(
        &self,
        wallet: &dyn WalletBalanceReader,
        address: &str,
    ) -> Result<BreakerStatus, BreakerError> {
        let start = Instant::now();
        let balance = wallet.usd_balance(address).await?;
        self.metrics
            .breaker_check_seconds
            .with_label_values(&["ok"])
            .observe(start.elapsed().as_secs_f64());

        let (disable, enable, _avg) = {
            let mut inner = self.inner.lock();
            inner.last_balance = balance;
            inner.last_check_ms = now_millis();
            self.thresholds_locked(&inner)
        };

        let was_enabled = self.is_enabled();
        if was_enabled && balance < disable {
            self.enabled.store(false, Ordering::SeqCst);
            self.metrics.breaker_state_changes.with_label_values(&["disable"]).inc();
            self.metrics.breaker_enabled.with_label_values(&["default"]).set(0.0);
            warn!(balance, disable, "circuit breaker disabling execution");
        } else if !was_enabled && balance >= enable {
            self.enabled.store(true, Ordering::SeqCst);
            self.metrics.breaker_state_changes.with_label_values(&["enable"]).inc();
            self.metrics.breaker_enabled.with_label_values(&["default"]).set(1.0);
            info!(balance, enable, "circuit breaker re-enabling execution");
        }

        Ok(self.status())
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let (disable, enable, avg) = self.thresholds_locked(&inner);
        BreakerStatus {
            enabled: self.is_enabled(),
            last_balance: inner.last_balance,
            last_check_ms: inner.last_check_ms,
            window: inner.window.iter().copied().collect(),
            disable_threshold: disable,
            enable_threshold: enable,
            rolling_average: avg,
        }
    }

    /// Spawns the periodic balance-check task (§4.8 "Scheduling").
    pub fn spawn(
        self: Arc<Self>,
        wallet: Arc<dyn WalletBalanceReader>,
        address: String,
        shutdown: ShutdownHandle,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = shutdown.interruptible_sleep(self.config.check_interval) => {}
                }
                if !shutdown.is_running() {
                    return;
                }
                if let Err(err) = self.check_balance(wallet.as_ref(), &address).await {
                    warn!(%err, "circuit breaker balance check failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::StaticBalanceReader;

    fn breaker(trade_multiplier: f64, min_absolute: f64, hysteresis_ratio: f64) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig { check_interval: Duration::from_secs(5), trade_multiplier, min_absolute, hysteresis_ratio },
            Metrics::new(),
        )
    }

    /// Invariant 7: empty window.
    #[test]
    fn thresholds_empty_window() {
        let b = breaker(3.0, 5.0, 1.5);
        let status = b.status();
        assert_eq!(status.disable_threshold, 5.0);
        assert_eq!(status.enable_threshold, 7.5);
    }

    /// Scenario B.
    #[tokio::test]
    async fn scenario_b_hysteresis() {
        let b = breaker(3.0, 5.0, 1.5);
        b.record_trade(10.0);
        let status = b.status();
        assert_eq!(status.disable_threshold, 30.0);
        assert_eq!(status.enable_threshold, 45.0);

        let wallet = StaticBalanceReader(100.0);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(b.is_enabled());

        let wallet = StaticBalanceReader(29.99);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(!b.is_enabled());

        let wallet = StaticBalanceReader(30.0);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(!b.is_enabled(), "30.0 < 45 enable threshold, stays disabled");

        let wallet = StaticBalanceReader(45.0);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(b.is_enabled(), "45.0 >= 45 enable threshold, non-strict >=");

        let wallet = StaticBalanceReader(50.0);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(b.is_enabled());
    }

    /// Scenario C: window retains only the last 20 trades.
    #[test]
    fn scenario_c_rolling_window_overflow() {
        let b = breaker(3.0, 5.0, 1.5);
        for size in 1..=25 {
            b.record_trade(size as f64);
        }
        let status = b.status();
        assert_eq!(status.window, (6..=25).map(|n| n as f64).collect::<Vec<_>>());
        assert!((status.rolling_average - 15.5).abs() < 1e-9);
        assert!((status.disable_threshold - 46.5).abs() < 1e-9);
        assert!((status.enable_threshold - 69.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disable_boundary_is_strict() {
        let b = breaker(1.0, 10.0, 1.5);
        let wallet = StaticBalanceReader(10.0);
        b.check_balance(&wallet, "addr").await.unwrap();
        assert!(b.is_enabled(), "balance == disable threshold stays enabled (strict <)");
    }
}

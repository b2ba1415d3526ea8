//! Wiring: constructs every subsystem from `EngineConfig` and runs
//! them to completion under one root cancellation handle (§5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::book::BookManager;
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::catalog::{CatalogClient, HttpCatalogClient};
use crate::config::EngineConfig;
use crate::detector::{Detector, DetectorConfig};
use crate::executor::{
    Eip712Signer, ExecutionMode, Executor, ExecutorConfig, HttpOrderSubmitter, ApiCredentials,
    OrderSigner, OrderSubmitter, SimulatedSubmitter,
};
use crate::fill_tracker::{FillRetryConfig, HttpOrderQuery, OrderQuery};
use crate::health::{self, ReadinessFlag};
use crate::metrics::Metrics;
use crate::model::Market;
use crate::reconnect::ReconnectConfig as StreamReconnectConfig;
use crate::shutdown::ShutdownHandle;
use crate::stream::{StreamConnectionConfig, StreamPool};
use crate::wallet::{HttpWalletBalanceReader, StaticBalanceReader, WalletBalanceReader};

/// Top-level handle: owns every subsystem's task set and the one root
/// cancellation token that tears them all down together.
pub struct Engine {
    config: EngineConfig,
    metrics: Metrics,
    shutdown: ShutdownHandle,
    ready: ReadinessFlag,
    book: BookManager,
    pool: StreamPool,
    executor: Arc<Executor>,
    breaker: Arc<CircuitBreaker>,
}

impl Engine {
    /// Constructs every subsystem. Mode-dependent collaborators
    /// (`simulated` vs `live`) are selected here: `simulated` wires
    /// in-process fakes so the whole pipeline runs with no external
    /// network dependency, `live` wires the HTTP-backed implementations.
    pub fn new(config: EngineConfig, seed_markets: Vec<Market>) -> Self {
        let metrics = Metrics::new();
        let shutdown = ShutdownHandle::new();
        let ready = ReadinessFlag::new();

        let mode: ExecutionMode = config.mode.parse().expect("validated at config load");

        let book = BookManager::new(metrics.clone());

        let conn_config = StreamConnectionConfig {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            message_buffer: config.message_buffer,
            reconnect: StreamReconnectConfig {
                initial_delay: Duration::from_millis(config.reconnect.initial_ms),
                max_delay: Duration::from_millis(config.reconnect.max_ms),
                multiplier: config.reconnect.multiplier,
                jitter_pct: config.reconnect.jitter_pct,
            },
        };
        let (pool, pool_rx) = StreamPool::spawn(
            config.exchange.ws_url.clone(),
            config.pool_size,
            conn_config,
            config.message_buffer,
            shutdown.clone(),
            metrics.clone(),
        );

        let (change_tx, change_rx) = tokio::sync::mpsc::channel(config.message_buffer);
        tokio::spawn(book.clone().run(pool_rx, change_tx, shutdown.clone()));

        let catalog: Arc<dyn CatalogClient> = if mode == ExecutionMode::Live {
            Arc::new(HttpCatalogClient::new(config.exchange.clob_url.clone()))
        } else {
            Arc::new(crate::catalog::StaticCatalog::new(seed_markets))
        };

        let detector = Detector::new(
            book.clone(),
            DetectorConfig {
                fee_buffer: config.fee_buffer,
                position_cap: config.max_position_size,
                catalog_refresh_interval: Duration::from_secs(60),
            },
            metrics.clone(),
        );
        detector.spawn_catalog_refresh(catalog, shutdown.clone());

        let breaker = Arc::new(CircuitBreaker::new(
            BreakerConfig {
                check_interval: Duration::from_secs(config.breaker.check_interval_secs),
                trade_multiplier: config.breaker.trade_multiplier,
                min_absolute: config.breaker.min_absolute,
                hysteresis_ratio: config.breaker.hysteresis_ratio,
            },
            metrics.clone(),
        ));

        let wallet: Arc<dyn WalletBalanceReader> = if mode == ExecutionMode::Live {
            Arc::new(HttpWalletBalanceReader::new(config.exchange.clob_url.clone()))
        } else {
            Arc::new(StaticBalanceReader(config.breaker.min_absolute * 10.0))
        };
        breaker.clone().spawn(wallet.clone(), config.exchange.wallet_address.clone(), shutdown.clone());

        let signer: Arc<dyn OrderSigner> = if mode == ExecutionMode::Live {
            Arc::new(Eip712Signer::new(&config.exchange.private_key, config.exchange.chain_id).expect("validated at config load"))
        } else {
            Arc::new(Eip712Signer::new(
                "0x0000000000000000000000000000000000000000000000000000000000000001",
                config.exchange.chain_id,
            ).expect("well-formed placeholder key"))
        };
        let submitter: Arc<dyn OrderSubmitter> = if mode == ExecutionMode::Live {
            Arc::new(HttpOrderSubmitter::new(
                config.exchange.clob_url.clone(),
                ApiCredentials {
                    api_key: config.exchange.api_key.clone(),
                    api_secret: config.exchange.api_secret.clone(),
                    passphrase: config.exchange.api_passphrase.clone(),
                    address: config.exchange.wallet_address.clone(),
                },
            ))
        } else {
            Arc::new(SimulatedSubmitter)
        };
        let order_query: Arc<dyn OrderQuery> = Arc::new(HttpOrderQuery::new(config.exchange.clob_url.clone()));

        let maker_address = config.exchange.proxy_address.clone().unwrap_or_else(|| config.exchange.wallet_address.clone());
        let executor = Arc::new(Executor::new(
            ExecutorConfig {
                mode,
                aggression_ticks: config.aggression_ticks,
                taker_fee: config.taker_fee,
                maker_address,
                taker_address: "0x0000000000000000000000000000000000000000".into(),
                signature_type: config.exchange.signature_type,
                neg_risk: false,
                fill_retry: FillRetryConfig {
                    initial_backoff: Duration::from_millis(config.fill.retry_initial_ms),
                    max_backoff: Duration::from_millis(config.fill.retry_max_ms),
                    backoff_multiplier: config.fill.retry_multiplier,
                    overall_timeout: Duration::from_secs(config.fill.overall_timeout_secs),
                },
            },
            signer,
            submitter,
            order_query,
            breaker.clone(),
            metrics.clone(),
        ));

        let (opp_tx, opp_rx) = tokio::sync::mpsc::channel(1024);
        tokio::spawn(detector.run(change_rx, opp_tx, shutdown.clone()));
        tokio::spawn(executor.clone().run(opp_rx, shutdown.clone()));

        Self { config, metrics, shutdown, ready, book, pool, executor, breaker }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn cumulative_profit(&self) -> f64 {
        self.executor.cumulative_profit()
    }

    pub fn is_breaker_enabled(&self) -> bool {
        self.breaker.is_enabled()
    }

    /// Starts the health/metrics probe server and subscribes to any
    /// catalog-derived tokens, then blocks until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.probe_addr.parse()?;
        let probe_shutdown = self.shutdown.clone();
        let ready = self.ready.clone();
        let metrics = self.metrics.clone();
        let probe_task = tokio::spawn(async move { health::serve(addr, ready, metrics, probe_shutdown).await });

        self.shutdown.spawn_signal_handler();
        self.ready.set_ready();
        info!(pool_size = self.pool.pool_size(), mode = %self.config.mode, "engine running");

        self.shutdown.cancelled().await;
        info!("shutdown signal observed, draining tasks");
        let _ = probe_task.await;
        Ok(())
    }

    /// Subscribes the pool to every outcome token across `markets`
    /// (used by the binary after an initial catalog fetch, and directly
    /// by tests that want a running pipeline without the HTTP catalog).
    pub fn subscribe_markets(&self, markets: &[Market]) {
        let token_ids: Vec<String> = markets.iter().flat_map(|m| m.token_ids().map(str::to_string)).collect();
        self.pool.subscribe(token_ids);
    }

    pub fn book(&self) -> &BookManager {
        &self.book
    }
}

//! Wallet balance reader (§6): the circuit breaker's sole external
//! collaborator, narrowed to the one call it needs.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("balance request failed: {0}")]
    RequestFailed(String),
    #[error("malformed balance response: {0}")]
    MalformedResponse(String),
}

/// USDC has 6 decimal places on Polygon (grounded in the teacher's
/// `get_usd_balance`, which divides the raw balance by this constant).
const USDC_DECIMALS_DIVISOR: f64 = 1_000_000.0;

#[async_trait]
pub trait WalletBalanceReader: Send + Sync {
    /// Current USDC balance of `address`, in USD.
    async fn usd_balance(&self, address: &str) -> Result<f64, WalletError>;
}

/// An HTTP-backed reader: GETs a raw 6-decimal-fixed big-integer balance
/// and converts to USD, mirroring the teacher's `get_balance_allowance`
/// + `get_usd_balance` pair.
pub struct HttpWalletBalanceReader {
    base_url: String,
    http: reqwest::Client,
}

impl HttpWalletBalanceReader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }
}

#[async_trait]
impl WalletBalanceReader for HttpWalletBalanceReader {
    async fn usd_balance(&self, address: &str) -> Result<f64, WalletError> {
        let url = format!("{}/balance?address={}", self.base_url.trim_end_matches('/'), address);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::RequestFailed(e.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WalletError::RequestFailed(e.to_string()))?;
        let raw = body
            .get("balance")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WalletError::MalformedResponse("missing balance field".into()))?;
        let raw: f64 = raw
            .parse()
            .map_err(|_| WalletError::MalformedResponse("balance is not numeric".into()))?;
        Ok(raw / USDC_DECIMALS_DIVISOR)
    }
}

/// A fixed-value reader for tests and the `simulated` mode.
pub struct StaticBalanceReader(pub f64);

#[async_trait]
impl WalletBalanceReader for StaticBalanceReader {
    async fn usd_balance(&self, _address: &str) -> Result<f64, WalletError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_reader_returns_fixed_value() {
        let reader = StaticBalanceReader(123.45);
        assert_eq!(reader.usd_balance("0xabc").await.unwrap(), 123.45);
    }
}

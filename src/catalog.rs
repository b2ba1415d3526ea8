//! Catalog metadata: the detector needs to know which token ids belong
//! to which market and outcome. This is sourced from an out-of-scope
//! HTTP collaborator (§1), modeled here as an injected trait so the
//! core is testable with a fake.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Market;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    RequestFailed(String),
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_markets(&self) -> Result<Vec<Market>, CatalogError>;
}

/// A `CatalogClient` backed by a fixed, pre-fetched list — the shape
/// tests and the `simulated` mode use.
pub struct StaticCatalog {
    markets: Vec<Market>,
}

impl StaticCatalog {
    pub fn new(markets: Vec<Market>) -> Self {
        Self { markets }
    }
}

#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn list_markets(&self) -> Result<Vec<Market>, CatalogError> {
        Ok(self.markets.clone())
    }
}

/// An HTTP-backed `CatalogClient` for the `live` mode, refreshed on a
/// slow poll interval independent of the book manager's hot path.
pub struct HttpCatalogClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: reqwest::Client::new() }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn list_markets(&self) -> Result<Vec<Market>, CatalogError> {
        let url = format!("{}/markets", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::RequestFailed(e.to_string()))?;
        response
            .json::<Vec<Market>>()
            .await
            .map_err(|e| CatalogError::RequestFailed(e.to_string()))
    }
}

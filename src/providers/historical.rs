//! Historical data provider contract and an HTTP-backed implementation
//! (§4.6, §4.9), used by the backfill coordinator.

use crate::core_types::{ProviderId, Symbol};
use crate::error::{CoreError, Result};
use crate::event::MarketEvent;
use async_trait::async_trait;
use chrono::NaiveDate;

/// One historical bar/record as returned by a vendor's REST API, prior to
/// canonicalization into a [`MarketEvent`].
#[derive(Debug, Clone)]
pub struct HistoricalBar {
    pub symbol: Symbol,
    pub event: MarketEvent,
}

/// A source of historical market data for backfill (§4.6, §4.9). Errors are
/// the caller's (the backfill coordinator's) signal to decide retry vs
/// provider rotation vs permanent failure — see `CoreError::is_retryable`.
#[async_trait]
pub trait HistoricalProvider: Send + Sync {
    fn provider_id(&self) -> &ProviderId;

    /// Relative priority among providers when none is explicitly preferred;
    /// lower sorts first (§4.9 "Provider selection").
    fn priority(&self) -> u32 {
        100
    }

    async fn fetch_bars(&self, symbol: &Symbol, date: NaiveDate) -> Result<Vec<HistoricalBar>>;
}

/// A generic REST-backed historical provider: one GET per `(symbol, date)`,
/// JSON array response, mapped through an injected decoder so this stays
/// vendor-agnostic (grounded on the pack's REST scrapers' use of `reqwest`
/// with a plain JSON decode step).
pub struct HttpHistoricalProvider {
    provider_id: ProviderId,
    base_url: String,
    priority: u32,
    client: reqwest::Client,
    decode: Box<dyn Fn(&Symbol, serde_json::Value) -> Result<Vec<HistoricalBar>> + Send + Sync>,
}

impl HttpHistoricalProvider {
    pub fn new(
        provider_id: ProviderId,
        base_url: impl Into<String>,
        priority: u32,
        decode: Box<dyn Fn(&Symbol, serde_json::Value) -> Result<Vec<HistoricalBar>> + Send + Sync>,
    ) -> Self {
        Self {
            provider_id,
            base_url: base_url.into(),
            priority,
            client: reqwest::Client::new(),
            decode,
        }
    }
}

#[async_trait]
impl HistoricalProvider for HttpHistoricalProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn fetch_bars(&self, symbol: &Symbol, date: NaiveDate) -> Result<Vec<HistoricalBar>> {
        let url = format!("{}/bars/{}/{}", self.base_url, symbol.as_str(), date);
        let response = self.client.get(&url).send().await.map_err(|e| CoreError::TransientIo {
            provider: self.provider_id.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::RateLimited {
                provider: self.provider_id.clone(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CoreError::AuthFailure {
                provider: self.provider_id.clone(),
                message: format!("HTTP {status}"),
            });
        }
        if status.is_server_error() {
            return Err(CoreError::TransientIo {
                provider: self.provider_id.clone(),
                message: format!("HTTP {status}"),
            });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NoData {
                provider: self.provider_id.clone(),
                symbol: symbol.clone(),
                date,
            });
        }
        if !status.is_success() {
            return Err(CoreError::Configuration(format!(
                "unexpected HTTP {status} from {}",
                self.provider_id
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(CoreError::from)?;
        (self.decode)(symbol, body)
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::TransientIo {
            provider: ProviderId::new("http"),
            message: err.to_string(),
        }
    }
}

//! Provider registry and streaming/historical client contracts (§4.6).
//!
//! The registry holds three maps — `DataSourceKind -> streaming factory`,
//! `providerName -> historical provider`, `providerName -> symbol search
//! provider` — populated once at startup and read-only thereafter (§5:
//! "Provider registries are populated at startup and thereafter
//! read-only"). Factories are invoked lazily so credentials can be resolved
//! at creation rather than at registration.

mod historical;
mod venue;
mod websocket;

pub use historical::{HistoricalBar, HistoricalProvider, HttpHistoricalProvider};
pub use venue::{PassthroughVenueMapper, VenueMapper};
pub use websocket::WebSocketStreamingClient;

use crate::core_types::{Mic, ProviderId, Symbol};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Which venue/vendor family a streaming factory builds clients for. A
/// plain enum + capability set, not a base class cast (Design Notes §9:
/// "Expose capabilities as data ... rather than via type casts").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    Alpaca,
    Polygon,
    Iex,
    Custom(String),
}

/// What a streaming client can be subscribed to for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Trades,
    BboQuote,
    Depth { levels: u32 },
}

/// Capability tags a client reports, so the registry/failover controller
/// can reason about what a provider supports without downcasting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub trades: bool,
    pub quotes: bool,
    pub depth: bool,
}

/// Connection health events a streaming client reports to the failover
/// controller (§4.6, §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionHealth {
    Connected,
    Stale,
    Disconnected,
    Error { message: String },
}

/// The streaming client contract every venue adapter implements (§4.6).
/// Vendor-specific updates are handed to collectors, never directly to the
/// pipeline, so canonicalization stays in one place.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    fn provider_id(&self) -> &ProviderId;
    fn capabilities(&self) -> Capabilities;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn subscribe(&self, symbol: &Symbol, what: SubscriptionKind) -> Result<()>;
    async fn unsubscribe(&self, symbol: &Symbol, what: SubscriptionKind) -> Result<()>;
}

/// Looks up a symbol against a provider's own search endpoint (§4.6).
#[async_trait]
pub trait SymbolSearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Symbol>>;
}

/// Lazily constructs a [`StreamingClient`] for one [`DataSourceKind`], so
/// credentials are resolved at creation time, not at registration (§4.6).
pub type StreamingClientFactory =
    Arc<dyn Fn() -> Result<Arc<dyn StreamingClient>> + Send + Sync>;

/// The three provider maps (§4.6), populated once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    streaming_factories: HashMap<DataSourceKind, StreamingClientFactory>,
    historical_providers: HashMap<ProviderId, Arc<dyn HistoricalProvider>>,
    symbol_search_providers: HashMap<ProviderId, Arc<dyn SymbolSearchProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_streaming_factory(&mut self, kind: DataSourceKind, factory: StreamingClientFactory) {
        self.streaming_factories.insert(kind, factory);
    }

    pub fn register_historical(&mut self, provider_id: ProviderId, provider: Arc<dyn HistoricalProvider>) {
        self.historical_providers.insert(provider_id, provider);
    }

    pub fn register_symbol_search(&mut self, provider_id: ProviderId, provider: Arc<dyn SymbolSearchProvider>) {
        self.symbol_search_providers.insert(provider_id, provider);
    }

    /// Invokes the registered factory for `kind`, resolving credentials at
    /// call time.
    pub fn build_streaming_client(&self, kind: &DataSourceKind) -> Result<Arc<dyn StreamingClient>> {
        let factory = self.streaming_factories.get(kind).ok_or_else(|| {
            crate::error::CoreError::Configuration(format!("no streaming factory for {kind:?}"))
        })?;
        factory()
    }

    pub fn historical(&self, provider_id: &ProviderId) -> Option<Arc<dyn HistoricalProvider>> {
        self.historical_providers.get(provider_id).cloned()
    }

    pub fn symbol_search(&self, provider_id: &ProviderId) -> Option<Arc<dyn SymbolSearchProvider>> {
        self.symbol_search_providers.get(provider_id).cloned()
    }

    pub fn historical_providers(&self) -> impl Iterator<Item = (&ProviderId, &Arc<dyn HistoricalProvider>)> {
        self.historical_providers.iter()
    }
}

/// Translates a provider-specific venue string to an ISO 10383 MIC.
/// Unknown values pass through as `None` so the event keeps its raw code
/// rather than fabricating one (§4.6).
pub fn resolve_mic(mapper: &dyn VenueMapper, raw_venue: &str) -> Option<Mic> {
    mapper.to_mic(raw_venue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_streaming_client_lazily() {
        let mut registry = ProviderRegistry::new();
        let built = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let built_clone = built.clone();
        registry.register_streaming_factory(
            DataSourceKind::Alpaca,
            Arc::new(move || {
                built_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Err(crate::error::CoreError::Configuration("stub".into()))
            }),
        );
        assert!(!built.load(std::sync::atomic::Ordering::SeqCst));
        let _ = registry.build_streaming_client(&DataSourceKind::Alpaca);
        assert!(built.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn unregistered_kind_is_a_configuration_error() {
        let registry = ProviderRegistry::new();
        let err = registry.build_streaming_client(&DataSourceKind::Polygon).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Configuration(_)));
    }
}

//! `TradeCollector` (§4.5): assigns a canonical sequence to vendor trade
//! updates and emits `Trade` events, inferring the aggressor side from the
//! prevailing BBO when the vendor doesn't report one.

use super::{BboState, Publisher, SequenceAllocator};
use crate::core_types::{Mic, ProviderId, Symbol};
use crate::event::{Aggressor, EventPayload, MarketEvent, TradePayload};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// A vendor trade update, prior to canonicalization.
pub struct VendorTrade {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub price: Decimal,
    pub size: Decimal,
    pub aggressor: Option<Aggressor>,
    pub trade_id: Option<String>,
    pub venue_mic: Option<Mic>,
    pub conditions: Option<Vec<String>>,
}

pub struct TradeCollector<P: Publisher> {
    source: ProviderId,
    publisher: Arc<P>,
    sequences: Arc<SequenceAllocator>,
    bbo: Arc<BboState>,
}

impl<P: Publisher> TradeCollector<P> {
    pub fn new(
        source: ProviderId,
        publisher: Arc<P>,
        sequences: Arc<SequenceAllocator>,
        bbo: Arc<BboState>,
    ) -> Self {
        Self {
            source,
            publisher,
            sequences,
            bbo,
        }
    }

    /// Infer the aggressor from the prevailing BBO when the vendor leaves it
    /// unreported: buy if price >= ask, sell if price <= bid, else unknown
    /// (§4.5).
    fn infer_aggressor(&self, symbol: &Symbol, price: Decimal) -> Aggressor {
        match self.bbo.get(symbol) {
            Some((_, ask)) if price >= ask => Aggressor::Buy,
            Some((bid, _)) if price <= bid => Aggressor::Sell,
            _ => Aggressor::Unknown,
        }
    }

    /// Canonicalizes one vendor trade update and publishes it. Returns
    /// `false` if validation rejected the trade (e.g. zero size) before it
    /// ever reached the publisher.
    pub fn on_trade(&self, vendor: VendorTrade) -> bool {
        let aggressor = vendor
            .aggressor
            .unwrap_or_else(|| self.infer_aggressor(&vendor.symbol, vendor.price));
        let sequence = self.sequences.next(&self.source, &vendor.symbol);

        let event = MarketEvent::new(
            vendor.timestamp,
            vendor.symbol,
            self.source.clone(),
            sequence,
            EventPayload::Trade(TradePayload {
                price: vendor.price,
                size: vendor.size,
                aggressor,
                trade_id: vendor.trade_id,
                venue_mic: vendor.venue_mic,
                conditions: vendor.conditions,
            }),
        );

        if event.validate().is_err() {
            tracing::warn!(
                target: "ingest",
                symbol = %event.symbol,
                source = %self.source,
                "rejected invalid trade"
            );
            return false;
        }
        self.publisher.publish(event)
    }
}

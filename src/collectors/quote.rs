//! `QuoteCollector` (§4.5): maintains (bid, ask) state per symbol, emits
//! `BboQuote` on change, suppresses exact duplicates, and rejects crossed
//! books with an `Integrity` event.

use super::{BboState, Publisher, SequenceAllocator};
use crate::core_types::{Mic, ProviderId, Symbol};
use crate::event::{
    BboQuotePayload, EventPayload, IntegrityKind, IntegrityPayload, MarketEvent,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct VendorQuote {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    pub venue_mic: Option<Mic>,
}

pub struct QuoteCollector<P: Publisher> {
    source: ProviderId,
    publisher: Arc<P>,
    sequences: Arc<SequenceAllocator>,
    bbo: Arc<BboState>,
    /// Last quote published per symbol, to suppress exact re-broadcasts.
    last_quote: DashMap<Symbol, BboQuotePayload>,
}

impl<P: Publisher> QuoteCollector<P> {
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
            last_quote: DashMap::new(),
        }
    }

    /// Returns `false` if the quote was a crossed book (rejected, Integrity
    /// emitted instead) or an exact duplicate of the last published quote
    /// for this symbol (suppressed, nothing emitted).
    pub fn on_quote(&self, vendor: VendorQuote) -> bool {
        let payload = BboQuotePayload::new(
            vendor.bid_price,
            vendor.bid_size,
            vendor.ask_price,
            vendor.ask_size,
            vendor.venue_mic,
        );

        if payload.is_crossed() {
            let sequence = self.sequences.next(&self.source, &vendor.symbol);
            let integrity = MarketEvent::new(
                vendor.timestamp,
                vendor.symbol,
                self.source.clone(),
                sequence,
                EventPayload::Integrity(IntegrityPayload {
                    kind: IntegrityKind::OutOfOrder,
                    detail: format!(
                        "crossed quote: bid {} > ask {}",
                        payload.bid_price, payload.ask_price
                    ),
                }),
            );
            self.publisher.publish(integrity);
            return false;
        }

        if let Some(existing) = self.last_quote.get(&vendor.symbol) {
            if *existing == payload {
                return false;
            }
        }

        self.bbo.set(vendor.symbol.clone(), payload.bid_price, payload.ask_price);
        self.last_quote.insert(vendor.symbol.clone(), payload.clone());

        let sequence = self.sequences.next(&self.source, &vendor.symbol);
        let event = MarketEvent::new(
            vendor.timestamp,
            vendor.symbol,
            self.source.clone(),
            sequence,
            EventPayload::BboQuote(payload),
        );
        self.publisher.publish(event)
    }
}

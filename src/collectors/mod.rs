//! Collectors (§4.5): per-symbol state machines that turn vendor updates
//! into normalized [`MarketEvent`]s and push them through a single
//! [`Publisher`] abstraction, so the canonicalization path is shared by
//! every provider client (§4.6).

mod depth;
mod publisher;
mod quote;
mod trade;

pub use depth::{DepthUpdate, MarketDepthCollector};
pub use publisher::{Publisher, SequenceAllocator};
pub use quote::QuoteCollector;
pub use trade::TradeCollector;

use crate::core_types::Symbol;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Last-known best bid/ask per symbol, shared between [`TradeCollector`]
/// (aggressor inference) and [`QuoteCollector`] (the state it publishes
/// from). Kept separate from either collector so both can hold a reference
/// without owning each other.
#[derive(Default)]
pub struct BboState {
    inner: DashMap<Symbol, (Decimal, Decimal)>,
}

impl BboState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<(Decimal, Decimal)> {
        self.inner.get(symbol).map(|e| *e.value())
    }

    pub fn set(&self, symbol: Symbol, bid: Decimal, ask: Decimal) {
        self.inner.insert(symbol, (bid, ask));
    }
}

//! Uniform market event model (§3).
//!
//! A `MarketEvent` is immutable after publish: collectors build it, the
//! pipeline owns it from `publish`/`tryPublish` until it is durably written
//! or audited as dropped. Payloads are a discriminated union on `type`.

use crate::core_types::{Mic, ProviderId, SeqNum, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side initiated a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressor {
    Buy,
    Sell,
    Unknown,
}

/// Book side for L2 deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bid,
    Ask,
}

/// Operation carried by an L2 delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

/// Kind of anomaly recorded by an `Integrity` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    GapDetected,
    Reset,
    OutOfOrder,
    DuplicateSuppressed,
}

/// A single resting level in an L2 snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_maker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePayload {
    pub price: Decimal,
    pub size: Decimal,
    pub aggressor: Aggressor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_mic: Option<Mic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BboQuotePayload {
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    /// Derived: `(bid_price + ask_price) / 2`.
    pub mid_price: Decimal,
    /// Derived: `ask_price - bid_price`.
    pub spread: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_mic: Option<Mic>,
}

impl BboQuotePayload {
    pub fn new(
        bid_price: Decimal,
        bid_size: Decimal,
        ask_price: Decimal,
        ask_size: Decimal,
        venue_mic: Option<Mic>,
    ) -> Self {
        let mid_price = (bid_price + ask_price) / Decimal::from(2);
        let spread = ask_price - bid_price;
        Self {
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            mid_price,
            spread,
            venue_mic,
        }
    }

    /// `bidPrice > askPrice` is a crossed book and must be rejected with an
    /// Integrity event (§3, §8 boundary behavior). `bidPrice == askPrice`
    /// (locked) is accepted — see Open Question in §9/DESIGN.md.
    pub fn is_crossed(&self) -> bool {
        self.bid_price > self.ask_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2SnapshotPayload {
    pub sequence_number: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2DeltaPayload {
    pub level: u32,
    pub side: Side,
    pub op: DeltaOp,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_maker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityPayload {
    pub kind: IntegrityKind,
    pub detail: String,
}

/// Discriminated event payload, tagged by `MarketEvent::event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Trade(TradePayload),
    #[serde(rename = "bboquote")]
    BboQuote(BboQuotePayload),
    #[serde(rename = "l2_snapshot")]
    L2Snapshot(L2SnapshotPayload),
    #[serde(rename = "l2_delta")]
    L2Delta(L2DeltaPayload),
    Integrity(IntegrityPayload),
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Trade(_) => "trade",
            EventPayload::BboQuote(_) => "bboquote",
            EventPayload::L2Snapshot(_) => "l2_snapshot",
            EventPayload::L2Delta(_) => "l2_delta",
            EventPayload::Integrity(_) => "integrity",
        }
    }

    /// The dedup-identity component of the composite key (§4.3), excluding
    /// the `source:effectiveSymbol:type:` prefix the caller prepends.
    pub fn dedup_identity(&self, timestamp: DateTime<Utc>, sequence: SeqNum) -> String {
        use std::hash::{Hash, Hasher};
        fn hash_of(h: impl Hash) -> u64 {
            let mut hasher = rustc_hash::FxHasher::default();
            h.hash(&mut hasher);
            hasher.finish()
        }
        match self {
            EventPayload::Trade(t) => format!(
                "{:x}",
                hash_of((
                    timestamp.timestamp_nanos_opt().unwrap_or_default(),
                    t.price.to_string(),
                    t.size.to_string(),
                    t.aggressor,
                    t.venue_mic.clone(),
                ))
            ),
            EventPayload::BboQuote(q) => format!(
                "{:x}",
                hash_of((
                    timestamp.timestamp_nanos_opt().unwrap_or_default(),
                    q.bid_price.to_string(),
                    q.ask_price.to_string(),
                    q.bid_size.to_string(),
                    q.ask_size.to_string(),
                ))
            ),
            EventPayload::L2Snapshot(snap) => format!("seq:{}", snap.sequence_number),
            _ => format!("seq:{sequence}"),
        }
    }
}

/// A uniform, normalized market observation (§3). Immutable after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_symbol: Option<Symbol>,
    pub source: ProviderId,
    pub sequence: SeqNum,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl MarketEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        source: ProviderId,
        sequence: SeqNum,
        payload: EventPayload,
    ) -> Self {
        Self {
            timestamp,
            symbol,
            canonical_symbol: None,
            source,
            sequence,
            payload,
        }
    }

    pub fn with_canonical_symbol(mut self, canonical: Symbol) -> Self {
        self.canonical_symbol = Some(canonical);
        self
    }

    /// The symbol dedup/storage should key on: canonical if present, else
    /// the raw vendor symbol (§4.3: "canonicalSymbol? (preferred for
    /// dedup/storage)").
    pub fn effective_symbol(&self) -> &Symbol {
        self.canonical_symbol.as_ref().unwrap_or(&self.symbol)
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Whether this event is structurally valid per the §3/§8 invariants
    /// that do not depend on stream state (sequence monotonicity is
    /// checked by the collector, not here).
    pub fn validate(&self) -> Result<(), String> {
        match &self.payload {
            EventPayload::Trade(t) => {
                if t.size.is_zero() || t.size.is_sign_negative() {
                    return Err("zero or negative trade size".to_string());
                }
                Ok(())
            }
            EventPayload::BboQuote(q) => {
                if q.is_crossed() {
                    return Err(format!(
                        "crossed quote: bid {} > ask {}",
                        q.bid_price, q.ask_price
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-01-02T14:30:00Z".parse().unwrap()
    }

    #[test]
    fn trade_happy_path_serializes_expected_shape() {
        let event = MarketEvent::new(
            ts(),
            Symbol::new("SPY"),
            ProviderId::new("alpaca"),
            1,
            EventPayload::Trade(TradePayload {
                price: Decimal::new(50012, 2),
                size: Decimal::new(100, 0),
                aggressor: Aggressor::Buy,
                trade_id: None,
                venue_mic: None,
                conditions: None,
            }),
        );
        assert_eq!(event.event_type(), "trade");
        assert!(event.validate().is_ok());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"trade\""));
        assert!(json.contains("\"symbol\":\"SPY\""));
    }

    #[test]
    fn zero_size_trade_is_rejected() {
        let event = MarketEvent::new(
            ts(),
            Symbol::new("SPY"),
            ProviderId::new("alpaca"),
            1,
            EventPayload::Trade(TradePayload {
                price: Decimal::new(100, 0),
                size: Decimal::ZERO,
                aggressor: Aggressor::Buy,
                trade_id: None,
                venue_mic: None,
                conditions: None,
            }),
        );
        assert!(event.validate().is_err());
    }

    #[test]
    fn locked_quote_is_accepted_crossed_is_rejected() {
        let locked = BboQuotePayload::new(
            Decimal::new(100, 0),
            Decimal::ONE,
            Decimal::new(100, 0),
            Decimal::ONE,
            None,
        );
        assert!(!locked.is_crossed());

        let crossed = BboQuotePayload::new(
            Decimal::new(101, 0),
            Decimal::ONE,
            Decimal::new(100, 0),
            Decimal::ONE,
            None,
        );
        assert!(crossed.is_crossed());
    }

    #[test]
    fn effective_symbol_prefers_canonical() {
        let event = MarketEvent::new(
            ts(),
            Symbol::new("AAPL.O"),
            ProviderId::new("polygon"),
            1,
            EventPayload::Integrity(IntegrityPayload {
                kind: IntegrityKind::Reset,
                detail: "failover".into(),
            }),
        )
        .with_canonical_symbol(Symbol::new("AAPL"));
        assert_eq!(event.effective_symbol().as_str(), "AAPL");
    }
}

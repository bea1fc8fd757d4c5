//! `MarketDepthCollector` (§4.5): applies L2 deltas to a per-symbol book,
//! keyed by price with bids descending / asks ascending (§3 invariant),
//! grounded on the teacher's `OrderBook` (`orderbook.rs`) use of ordered
//! maps for price-level storage, adapted from order-matching state to
//! depth-feed state.

use super::{Publisher, SequenceAllocator};
use crate::core_types::ProviderId;
use crate::core_types::Symbol;
use crate::event::{
    BookLevel, DeltaOp, EventPayload, IntegrityKind, IntegrityPayload, L2DeltaPayload,
    L2SnapshotPayload, MarketEvent, Side,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A vendor depth update, carrying the vendor's own monotone `position`
/// counter so the collector can detect gaps (§3, §4.5, §8 scenario S4).
pub enum DepthUpdate {
    Snapshot {
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        position: u64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    Delta {
        timestamp: DateTime<Utc>,
        symbol: Symbol,
        position: u64,
        side: Side,
        op: DeltaOp,
        price: Decimal,
        size: Decimal,
        market_maker: Option<String>,
    },
}

impl DepthUpdate {
    fn symbol(&self) -> &Symbol {
        match self {
            DepthUpdate::Snapshot { symbol, .. } => symbol,
            DepthUpdate::Delta { symbol, .. } => symbol,
        }
    }

    fn position(&self) -> u64 {
        match self {
            DepthUpdate::Snapshot { position, .. } => *position,
            DepthUpdate::Delta { position, .. } => *position,
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DepthUpdate::Snapshot { timestamp, .. } => *timestamp,
            DepthUpdate::Delta { timestamp, .. } => *timestamp,
        }
    }
}

struct Book {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_position: Option<u64>,
    /// Set after a reset; deltas are dropped until a fresh snapshot arrives
    /// (§4.5: "requires a fresh snapshot before resuming").
    awaiting_snapshot: bool,
}

impl Book {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_position: None,
            awaiting_snapshot: true,
        }
    }

    fn apply_delta(&mut self, side: Side, op: DeltaOp, price: Decimal, size: Decimal) {
        let levels = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        match op {
            DeltaOp::Insert | DeltaOp::Update => {
                levels.insert(price, size);
            }
            DeltaOp::Delete => {
                levels.remove(&price);
            }
        }
    }

    /// 0-based depth index of `price` on `side` after the update that
    /// produced it, used for the `L2Delta.level` field.
    fn level_of(&self, side: Side, price: Decimal) -> u32 {
        match side {
            Side::Bid => self.bids.keys().rev().position(|p| *p == price).unwrap_or(0) as u32,
            Side::Ask => self.asks.keys().position(|p| *p == price).unwrap_or(0) as u32,
        }
    }

    fn snapshot_payload(&self, sequence_number: u64) -> L2SnapshotPayload {
        L2SnapshotPayload {
            sequence_number,
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(price, size)| BookLevel {
                    price: *price,
                    size: *size,
                    market_maker: None,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(price, size)| BookLevel {
                    price: *price,
                    size: *size,
                    market_maker: None,
                })
                .collect(),
        }
    }
}

pub struct MarketDepthCollector<P: Publisher> {
    source: ProviderId,
    publisher: Arc<P>,
    sequences: Arc<SequenceAllocator>,
    books: DashMap<Symbol, Book>,
}

impl<P: Publisher> MarketDepthCollector<P> {
    pub fn new(source: ProviderId, publisher: Arc<P>, sequences: Arc<SequenceAllocator>) -> Self {
        Self {
            source,
            publisher,
            sequences,
            books: DashMap::new(),
        }
    }

    fn emit_reset(&self, symbol: &Symbol, timestamp: DateTime<Utc>, detail: String) {
        let sequence = self.sequences.next(&self.source, symbol);
        let event = MarketEvent::new(
            timestamp,
            symbol.clone(),
            self.source.clone(),
            sequence,
            EventPayload::Integrity(IntegrityPayload {
                kind: IntegrityKind::GapDetected,
                detail,
            }),
        );
        self.publisher.publish(event);
    }

    pub fn on_update(&self, update: DepthUpdate) {
        let symbol = update.symbol().clone();
        let mut book = self.books.entry(symbol.clone()).or_insert_with(Book::new);

        match update {
            DepthUpdate::Snapshot {
                timestamp,
                position,
                bids,
                asks,
                ..
            } => {
                book.bids = bids.into_iter().collect();
                book.asks = asks.into_iter().collect();
                book.last_position = Some(position);
                book.awaiting_snapshot = false;

                let sequence = self.sequences.next(&self.source, &symbol);
                let payload = book.snapshot_payload(sequence);
                let event = MarketEvent::new(
                    timestamp,
                    symbol,
                    self.source.clone(),
                    sequence,
                    EventPayload::L2Snapshot(payload),
                );
                self.publisher.publish(event);
            }
            DepthUpdate::Delta {
                timestamp,
                position,
                side,
                op,
                price,
                size,
                market_maker,
                ..
            } => {
                if book.awaiting_snapshot {
                    tracing::debug!(
                        target: "ingest",
                        symbol = %symbol,
                        "dropping depth delta while awaiting a fresh snapshot"
                    );
                    return;
                }

                let expected = book.last_position.map(|p| p + 1).unwrap_or(position);
                if position <= book.last_position.unwrap_or(0) && book.last_position.is_some() {
                    // Duplicate re-delivery of an already-applied position.
                    return;
                }
                if position > expected {
                    let detail = format!(
                        "depth position gap for {symbol}: expected {expected}, got {position}"
                    );
                    book.awaiting_snapshot = true;
                    book.last_position = None;
                    book.bids.clear();
                    book.asks.clear();
                    drop(book);
                    self.emit_reset(&symbol, timestamp, detail);
                    return;
                }

                book.last_position = Some(position);
                book.apply_delta(side, op, price, size);
                let level = book.level_of(side, price);

                let sequence = self.sequences.next(&self.source, &symbol);
                let event = MarketEvent::new(
                    timestamp,
                    symbol,
                    self.source.clone(),
                    sequence,
                    EventPayload::L2Delta(L2DeltaPayload {
                        level,
                        side,
                        op,
                        price,
                        size,
                        market_maker,
                    }),
                );
                self.publisher.publish(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingPublisher(Mutex<Vec<MarketEvent>>);
    impl Publisher for RecordingPublisher {
        fn publish(&self, event: MarketEvent) -> bool {
            self.0.lock().unwrap().push(event);
            true
        }
    }

    fn collector() -> (MarketDepthCollector<RecordingPublisher>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher(Mutex::new(Vec::new())));
        let collector = MarketDepthCollector::new(
            ProviderId::new("alpaca"),
            publisher.clone(),
            Arc::new(SequenceAllocator::new()),
        );
        (collector, publisher)
    }

    fn snapshot(symbol: &str, position: u64) -> DepthUpdate {
        DepthUpdate::Snapshot {
            timestamp: Utc::now(),
            symbol: Symbol::new(symbol),
            position,
            bids: vec![(Decimal::new(100, 0), Decimal::ONE)],
            asks: vec![(Decimal::new(101, 0), Decimal::ONE)],
        }
    }

    fn delta(symbol: &str, position: u64) -> DepthUpdate {
        DepthUpdate::Delta {
            timestamp: Utc::now(),
            symbol: Symbol::new(symbol),
            position,
            side: Side::Bid,
            op: DeltaOp::Update,
            price: Decimal::new(99, 0),
            size: Decimal::new(5, 0),
            market_maker: None,
        }
    }

    #[test]
    fn snapshot_then_delta_applies_cleanly() {
        let (collector, publisher) = collector();
        collector.on_update(snapshot("SPY", 0));
        collector.on_update(delta("SPY", 1));
        let events = publisher.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].payload, EventPayload::L2Snapshot(_)));
        assert!(matches!(events[1].payload, EventPayload::L2Delta(_)));
    }

    #[test]
    fn position_gap_triggers_reset_and_requires_fresh_snapshot() {
        let (collector, publisher) = collector();
        collector.on_update(snapshot("X", 0));
        collector.on_update(delta("X", 0)); // duplicate, suppressed
        collector.on_update(delta("X", 0)); // duplicate, suppressed
        collector.on_update(delta("X", 3)); // gap: expected 1, got 3

        let events = publisher.0.lock().unwrap();
        assert_eq!(events.len(), 2, "snapshot + one integrity event");
        match &events[1].payload {
            EventPayload::Integrity(p) => assert_eq!(p.kind, IntegrityKind::GapDetected),
            other => panic!("expected Integrity, got {other:?}"),
        }
        drop(events);

        // Deltas are dropped until a fresh snapshot lands.
        collector.on_update(delta("X", 1));
        assert_eq!(publisher.0.lock().unwrap().len(), 2);

        collector.on_update(snapshot("X", 0));
        collector.on_update(delta("X", 1));
        assert_eq!(publisher.0.lock().unwrap().len(), 4);
    }

    #[test]
    fn bids_sorted_descending_asks_ascending_in_snapshot() {
        let (collector, publisher) = collector();
        collector.on_update(DepthUpdate::Snapshot {
            timestamp: Utc::now(),
            symbol: Symbol::new("SPY"),
            position: 0,
            bids: vec![
                (Decimal::new(99, 0), Decimal::ONE),
                (Decimal::new(100, 0), Decimal::ONE),
            ],
            asks: vec![
                (Decimal::new(102, 0), Decimal::ONE),
                (Decimal::new(101, 0), Decimal::ONE),
            ],
        });
        let events = publisher.0.lock().unwrap();
        match &events[0].payload {
            EventPayload::L2Snapshot(s) => {
                assert_eq!(s.bids[0].price, Decimal::new(100, 0));
                assert_eq!(s.asks[0].price, Decimal::new(101, 0));
            }
            _ => panic!("expected snapshot"),
        }
    }
}

//! The single `Publisher` seam every collector pushes through (§4.5), so a
//! gap-filled channel is the only thing downstream of canonicalization.

use crate::core_types::{ProviderId, Symbol};
use crate::event::MarketEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything collectors can hand a finished [`MarketEvent`] to. Implemented by
/// `PipelinePublisher` (wraps the real [`crate::pipeline::EventPipeline`])
/// and by plain test doubles.
pub trait Publisher: Send + Sync {
    /// Returns `false` if the event was dropped (backpressure or a disposed
    /// pipeline); collectors treat this as "accounted for", not an error —
    /// the pipeline itself already records the drop (§4.5: "failures to
    /// publish increment the pipeline's dropped counter and are audited").
    fn publish(&self, event: MarketEvent) -> bool;
}

/// Per-`(source, symbol)` monotone sequence counters (§3: "sequence is
/// strictly increasing ... within a (source, symbol) stream"), shared across
/// the trade/quote/depth collectors for one provider so the invariant holds
/// across event types, not just within one.
#[derive(Default)]
pub struct SequenceAllocator {
    counters: DashMap<(ProviderId, Symbol), AtomicU64>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns and returns the next sequence for `(source, symbol)`,
    /// starting at 1.
    pub fn next(&self, source: &ProviderId, symbol: &Symbol) -> u64 {
        let entry = self
            .counters
            .entry((source.clone(), symbol.clone()))
            .or_insert_with(|| AtomicU64::new(0));
        entry.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_allocator_is_monotone_per_source_symbol() {
        let alloc = SequenceAllocator::new();
        let src = ProviderId::new("alpaca");
        let sym = Symbol::new("SPY");
        assert_eq!(alloc.next(&src, &sym), 1);
        assert_eq!(alloc.next(&src, &sym), 2);
        // A different symbol gets its own counter.
        assert_eq!(alloc.next(&src, &Symbol::new("MSFT")), 1);
    }
}

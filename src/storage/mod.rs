//! Append-only storage sink (§4.1): one JSON object per line, partitioned
//! by naming policy and date, with optional per-file gzip.

pub mod composite;
pub mod jsonl;
pub mod naming;

use crate::error::Result;
use crate::event::MarketEvent;

/// Contract every storage backend implements. Only the pipeline's single
/// consumer thread calls these, so no internal locking beyond what the
/// file layer requires (§4.1).
pub trait Sink: Send {
    fn append(&mut self, event: &MarketEvent) -> Result<()>;
    /// Force all buffered bytes to durable storage.
    fn flush(&mut self) -> Result<()>;
    /// Flush then close every open partition.
    fn dispose(&mut self) -> Result<()>;
}

pub use composite::CompositeSink;
pub use jsonl::JsonlSink;

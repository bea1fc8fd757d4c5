//! Status reporting (§6): writes `{dataRoot}/_status/status.json`, a
//! point-in-time snapshot of pipeline throughput and queue depth for
//! external monitoring, mirroring the teacher's periodic ledger/CSV dumps
//! but as a single overwritten JSON file rather than an append log.

use crate::error::{CoreError, Result};
use crate::pipeline::metrics::PipelineMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::Ordering;

#[derive(Serialize)]
struct Status {
    generated_at: DateTime<Utc>,
    published: u64,
    dropped: u64,
    consumed: u64,
    recovered: u64,
    queue_len: usize,
}

/// Overwrites `{data_root}/_status/status.json` with a fresh snapshot,
/// atomically via write-to-temp + rename (matching the WAL commit
/// pointer's and the backfill job's own atomic-write pattern).
pub fn write(data_root: &Path, metrics: &PipelineMetrics, queue_len: usize) -> Result<()> {
    let dir = data_root.join("_status");
    std::fs::create_dir_all(&dir).map_err(CoreError::Io)?;

    let status = Status {
        generated_at: Utc::now(),
        published: metrics.published.load(Ordering::Relaxed),
        dropped: metrics.dropped.load(Ordering::Relaxed),
        consumed: metrics.consumed.load(Ordering::Relaxed),
        recovered: metrics.recovered.load(Ordering::Relaxed),
        queue_len,
    };

    let path = dir.join("status.json");
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(&status).map_err(CoreError::Serde)?;
    std::fs::write(&tmp, bytes).map_err(CoreError::Io)?;
    std::fs::rename(&tmp, &path).map_err(CoreError::Io)?;
    Ok(())
}

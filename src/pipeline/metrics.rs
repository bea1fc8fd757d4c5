//! Pipeline metrics (§4.4): counters, queue gauges, and a hysteretic
//! backpressure warning (fires at 80% utilization, re-arms below 50%).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub consumed: AtomicU64,
    pub recovered: AtomicU64,
    pub processing_time_micros_sum: AtomicU64,
    warned: std::sync::atomic::AtomicBool,
}

pub struct MetricsSnapshot {
    pub published: u64,
    pub dropped: u64,
    pub consumed: u64,
    pub recovered: u64,
    pub queue_size: usize,
    pub peak_queue_size: usize,
    pub utilization: f64,
}

impl PipelineMetrics {
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_consumed(&self, count: u64, processing_time_micros: u64) {
        self.consumed.fetch_add(count, Ordering::Relaxed);
        self.processing_time_micros_sum
            .fetch_add(processing_time_micros, Ordering::Relaxed);
    }

    pub fn record_recovered(&self, count: u64) {
        self.recovered.fetch_add(count, Ordering::Relaxed);
    }

    /// Update the hysteretic warning state given the current utilization
    /// fraction; logs a one-shot warning on crossing the high watermark.
    pub fn check_watermarks(&self, utilization: f64, high: f64, low: f64) {
        if utilization >= high && !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                target: "ingest",
                utilization,
                "pipeline queue utilization crossed high watermark"
            );
        } else if utilization <= low {
            self.warned.store(false, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, queue_size: usize, peak_queue_size: usize, capacity: usize) -> MetricsSnapshot {
        let utilization = if capacity == 0 {
            0.0
        } else {
            queue_size as f64 / capacity as f64
        };
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            queue_size,
            peak_queue_size,
            utilization,
        }
    }
}

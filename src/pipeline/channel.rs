//! Bounded producer/consumer channel with configurable backpressure policy
//! (§4.4, §5). Neither `tokio::sync::mpsc` (no eviction) nor the teacher's
//! spin-wait `ArrayQueue` (no async suspension) support `DropOldest`
//! eviction plus a suspending `Wait` mode, so this is a small purpose-built
//! primitive: a `Mutex<VecDeque<T>>` guarding the queue, with a
//! `tokio::sync::Notify` pair to wake waiting producers/consumers.

use crate::config::DropPolicy;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Outcome of a single push attempt, used by the caller to decide whether
/// (and what) to route to the drop audit trail.
pub enum PushOutcome<T> {
    /// The item was queued.
    Accepted,
    /// Full under `DropNewest` (or `Wait` via the non-suspending path): the
    /// new item itself was rejected and is returned to the caller.
    RejectedNewest(T),
    /// Full under `DropOldest`: the new item was queued after evicting the
    /// oldest entry, returned here for audit.
    EvictedOldest(T),
}

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    drop_policy: DropPolicy,
    closed: std::sync::atomic::AtomicBool,
    not_empty: Notify,
    not_full: Notify,
    peak_len: std::sync::atomic::AtomicUsize,
}

pub struct BoundedChannel<T> {
    inner: std::sync::Arc<Inner<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedChannel<T> {
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                drop_policy,
                closed: std::sync::atomic::AtomicBool::new(false),
                not_empty: Notify::new(),
                not_full: Notify::new(),
                peak_len: std::sync::atomic::AtomicUsize::new(0),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn peak_len(&self) -> usize {
        self.inner.peak_len.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn record_len(&self, len: usize) {
        let peak = &self.inner.peak_len;
        let mut current = peak.load(std::sync::atomic::Ordering::Relaxed);
        while len > current {
            match peak.compare_exchange_weak(
                current,
                len,
                std::sync::atomic::Ordering::Relaxed,
                std::sync::atomic::Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Non-suspending publish: never awaits (§4.4 `tryPublish`). `Wait`
    /// policy has no non-suspending meaning, so it falls back to
    /// `DropNewest` semantics here.
    pub fn try_push(&self, item: T) -> PushOutcome<T> {
        let mut queue = self.inner.queue.lock().unwrap();
        if queue.len() < self.inner.capacity {
            queue.push_back(item);
            let len = queue.len();
            drop(queue);
            self.record_len(len);
            self.inner.not_empty.notify_one();
            return PushOutcome::Accepted;
        }
        match self.inner.drop_policy {
            DropPolicy::DropOldest => {
                let evicted = queue.pop_front();
                queue.push_back(item);
                let len = queue.len();
                drop(queue);
                self.record_len(len);
                self.inner.not_empty.notify_one();
                // `evicted` is Some by construction (capacity > 0 assumed).
                PushOutcome::EvictedOldest(evicted.expect("queue was at capacity"))
            }
            DropPolicy::DropNewest | DropPolicy::Wait => PushOutcome::RejectedNewest(item),
        }
    }

    /// Suspending publish used by the async `publish` path. Under `Wait`
    /// policy, suspends until a slot frees; under the other policies it
    /// behaves exactly like `try_push`.
    pub async fn push(&self, item: T) -> PushOutcome<T> {
        if !matches!(self.inner.drop_policy, DropPolicy::Wait) {
            return self.try_push(item);
        }
        let mut item = item;
        loop {
            let notified = self.inner.not_full.notified();
            {
                let mut queue = self.inner.queue.lock().unwrap();
                if queue.len() < self.inner.capacity {
                    queue.push_back(item);
                    let len = queue.len();
                    drop(queue);
                    self.record_len(len);
                    self.inner.not_empty.notify_one();
                    return PushOutcome::Accepted;
                }
            }
            if self.is_closed() {
                return PushOutcome::RejectedNewest(item);
            }
            notified.await;
        }
    }

    /// Pop up to `max` items without waiting.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut queue = self.inner.queue.lock().unwrap();
        let n = max.min(queue.len());
        let batch: Vec<T> = queue.drain(..n).collect();
        drop(queue);
        if !batch.is_empty() {
            self.inner.not_full.notify_waiters();
        }
        batch
    }

    /// Pop up to `max` items, waiting for at least one if the queue is
    /// currently empty and open. Returns an empty vec only once the channel
    /// is closed and drained.
    pub async fn pop_batch_wait(&self, max: usize) -> Vec<T> {
        loop {
            let batch = self.pop_batch(max);
            if !batch.is_empty() {
                return batch;
            }
            if self.is_closed() {
                return Vec::new();
            }
            self.inner.not_empty.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_push_accepts_until_capacity() {
        let chan = BoundedChannel::new(2, DropPolicy::DropNewest);
        assert!(matches!(chan.try_push(1), PushOutcome::Accepted));
        assert!(matches!(chan.try_push(2), PushOutcome::Accepted));
        assert!(matches!(chan.try_push(3), PushOutcome::RejectedNewest(3)));
        assert_eq!(chan.len(), 2);
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let chan = BoundedChannel::new(2, DropPolicy::DropOldest);
        chan.try_push(1);
        chan.try_push(2);
        match chan.try_push(3) {
            PushOutcome::EvictedOldest(evicted) => assert_eq!(evicted, 1),
            _ => panic!("expected eviction"),
        }
        assert_eq!(chan.pop_batch(10), vec![2, 3]);
    }

    #[tokio::test]
    async fn wait_policy_suspends_until_slot_frees() {
        let chan = BoundedChannel::new(1, DropPolicy::Wait);
        chan.try_push(1);
        let chan2 = chan.clone();
        let handle = tokio::spawn(async move {
            matches!(chan2.push(2).await, PushOutcome::Accepted)
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(chan.pop_batch(1), vec![1]);
        assert!(handle.await.unwrap());
    }

    #[test]
    fn peak_len_tracks_high_watermark() {
        let chan = BoundedChannel::new(4, DropPolicy::DropNewest);
        chan.try_push(1);
        chan.try_push(2);
        chan.try_push(3);
        chan.pop_batch(2);
        assert_eq!(chan.peak_len(), 3);
    }
}

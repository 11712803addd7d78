//! Single-slot, newest-wins hand-off between ingress and the pipeline.
//!
//! The queue holds at most one undelivered [`Frame`]. A `put` while a frame is
//! still pending discards the pending (older) frame, so a slow consumer only
//! ever sees the most recent image and latency cannot accumulate.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use framerelay::queue::{FreshnessQueue, PutOutcome};
//! use framerelay::types::Frame;
//!
//! let queue = FreshnessQueue::new();
//! assert_eq!(queue.put(Frame::new(vec![1], 1)), PutOutcome::Stored);
//! assert_eq!(queue.put(Frame::new(vec![2], 2)), PutOutcome::Replaced { dropped: 1 });
//!
//! let frame = queue.take().await.unwrap();
//! assert_eq!(frame.sequence(), 2);
//! assert_eq!(queue.dropped(), 1);
//! # }
//! ```

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

use crate::types::Frame;

/// Result of a [`FreshnessQueue::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The slot was empty; the frame is now pending.
    Stored,
    /// A pending frame was discarded in favour of the new one.
    Replaced {
        /// Sequence number of the discarded frame
        dropped: u64,
    },
    /// The queue is closed; the frame was released.
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Frame>,
    closed: bool,
}

/// Capacity-one frame buffer with drop-oldest semantics.
///
/// Intended for exactly one producer and one consumer. `put` is synchronous
/// and never waits for the consumer; `take` suspends until a frame is pending
/// or the queue is closed.
#[derive(Debug, Default)]
pub struct FreshnessQueue {
    slot: Mutex<Slot>,
    notify: Notify,
    dropped: AtomicU64,
}

impl FreshnessQueue {
    /// Create an empty, open queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot is a plain Option swap; a panic elsewhere cannot leave it torn.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a frame, discarding any frame that has not been taken yet.
    pub fn put(&self, frame: Frame) -> PutOutcome {
        let stale = {
            let mut slot = self.lock();
            if slot.closed {
                return PutOutcome::Closed;
            }
            slot.pending.replace(frame)
        };

        self.notify.notify_one();

        match stale {
            Some(stale) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = stale.sequence(), "Dropped stale frame");
                PutOutcome::Replaced { dropped: stale.sequence() }
            }
            None => PutOutcome::Stored,
        }
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the queue is closed. A frame still pending at close
    /// time is released, not delivered.
    pub async fn take(&self) -> Option<Frame> {
        loop {
            // Register interest before inspecting the slot so a put or close
            // between the check and the await still wakes us.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut slot = self.lock();
                if slot.closed {
                    return None;
                }
                if let Some(frame) = slot.pending.take() {
                    return Some(frame);
                }
            }

            notified.await;
        }
    }

    /// Close the queue. Idempotent.
    ///
    /// Any pending frame is released, a suspended `take` returns `None`, and
    /// later `put` calls become no-ops.
    pub fn close(&self) {
        let released = {
            let mut slot = self.lock();
            slot.closed = true;
            slot.pending.take()
        };
        drop(released);
        self.notify.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether no frame is pending
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_none()
    }

    /// Number of frames discarded because a newer frame replaced them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence.to_le_bytes().to_vec(), sequence)
    }

    proptest! {
        #[test]
        fn take_returns_the_last_put(count in 1u64..200) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let queue = FreshnessQueue::new();

            for sequence in 1..=count {
                queue.put(frame(sequence));
            }

            let taken = rt.block_on(queue.take()).unwrap();
            prop_assert_eq!(taken.sequence(), count);
            prop_assert_eq!(queue.dropped(), count - 1);
            prop_assert!(queue.is_empty());
        }

        #[test]
        fn interleaved_puts_and_takes_never_duplicate(ops in prop::collection::vec(any::<bool>(), 1..300)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let queue = FreshnessQueue::new();
            let mut next = 1u64;
            let mut last_taken = 0u64;
            let mut delivered = 0u64;

            for is_put in ops {
                if is_put {
                    queue.put(frame(next));
                    next += 1;
                } else if !queue.is_empty() {
                    let taken = rt.block_on(queue.take()).unwrap();
                    prop_assert!(taken.sequence() > last_taken);
                    prop_assert_eq!(taken.sequence(), next - 1);
                    last_taken = taken.sequence();
                    delivered += 1;
                }
            }

            let pending = u64::from(!queue.is_empty());
            prop_assert_eq!(delivered + queue.dropped() + pending, next - 1);
        }
    }

    #[test]
    fn put_reports_what_it_replaced() {
        let queue = FreshnessQueue::new();
        assert_eq!(queue.put(frame(1)), PutOutcome::Stored);
        assert_eq!(queue.put(frame(2)), PutOutcome::Replaced { dropped: 1 });
        assert_eq!(queue.put(frame(3)), PutOutcome::Replaced { dropped: 2 });
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn put_does_not_wait_for_a_stalled_consumer() {
        let queue = FreshnessQueue::new();
        let start = Instant::now();

        for sequence in 1..=10_000 {
            queue.put(frame(sequence));
        }

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.dropped(), 9_999);
    }

    #[tokio::test]
    async fn take_waits_for_a_put() {
        let queue = Arc::new(FreshnessQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await.map(|f| f.sequence()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.put(frame(5));
        let taken = tokio::time::timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(taken, Some(5));
    }

    #[tokio::test]
    async fn consecutive_takes_yield_distinct_frames() {
        let queue = FreshnessQueue::new();
        queue.put(frame(1));
        let first = queue.take().await.unwrap();

        queue.put(frame(2));
        let second = queue.take().await.unwrap();

        assert_ne!(first.sequence(), second.sequence());

        // Nothing left: a third take must keep waiting.
        let third = tokio::time::timeout(Duration::from_millis(20), queue.take()).await;
        assert!(third.is_err());
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_take() {
        let queue = Arc::new(FreshnessQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let got_none = tokio::time::timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert!(got_none);
    }

    #[tokio::test]
    async fn closed_queue_rejects_puts_and_releases_pending() {
        let queue = FreshnessQueue::new();
        queue.put(frame(1));
        queue.close();
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert_eq!(queue.put(frame(2)), PutOutcome::Closed);
        assert!(queue.take().await.is_none());
    }

    #[test]
    fn concurrent_producer_consumer_deliver_in_order() {
        let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(2).build().unwrap();
        rt.block_on(async {
            let queue = Arc::new(FreshnessQueue::new());

            let producer = {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for sequence in 1..=5_000 {
                        queue.put(frame(sequence));
                        if sequence % 64 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    queue.close();
                })
            };

            let mut seen = Vec::new();
            while let Some(frame) = queue.take().await {
                seen.push(frame.sequence());
            }
            producer.await.unwrap();

            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            assert!(seen.len() as u64 + queue.dropped() <= 5_000);
        });
    }
}

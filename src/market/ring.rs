//! Bounded SPMC broadcast ring for market-data fan-out.
//!
//! One producer, N consumers; every consumer sees every enqueued item
//! exactly once via its own cursor. Hot paths are lock-free: the
//! producer gates on the slowest consumer's cursor (cached, refreshed
//! on demand) and publishes with release stores; consumers synchronize
//! on per-slot sequence counters with acquire loads. The mutex/condvar
//! pair exists only for blocking waits and batched notification.
//!
//! # Protocol
//!
//! Positions are unbounded `u64` counters; the slot index is
//! `position & mask`. Each slot's `seq` is initialized to its index and
//! stamped `position + 1` after a write, so a consumer at `tail` knows
//! the slot is ready exactly when `seq == tail + 1`. The capacity gate
//! (`head − min_tail < capacity`) guarantees the producer never
//! overwrites a slot a consumer has not passed.

use crossbeam::utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Shared state of one broadcast ring.
///
/// Construct with [`MarketRing::with_consumers`], which hands out the
/// single [`RingProducer`] and the per-thread [`RingConsumer`]s.
pub struct MarketRing<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,
    head: CachePadded<AtomicU64>,
    tails: Box<[CachePadded<AtomicU64>]>,
    notify_batch: u64,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
}

// SAFETY: slot access is serialized by the seq/cursor protocol; values
// are Copy so no drop coordination is needed.
unsafe impl<T: Copy + Send> Send for MarketRing<T> {}
unsafe impl<T: Copy + Send> Sync for MarketRing<T> {}

impl<T: Copy + Send> MarketRing<T> {
    /// Builds a ring and splits it into its producer and `consumers`
    /// consumer handles.
    ///
    /// `capacity` is rounded up to a power of two. With
    /// `notify_batch > 0` the producer broadcasts the condvar every
    /// `notify_batch` items; `0` disables notification entirely (pure
    /// polling consumers).
    #[must_use]
    pub fn with_consumers(
        capacity: usize,
        consumers: usize,
        notify_batch: u64,
    ) -> (RingProducer<T>, Vec<RingConsumer<T>>) {
        assert!(capacity > 0, "ring capacity must be non-zero");
        assert!(consumers > 0, "ring needs at least one consumer");
        let capacity = capacity.next_power_of_two() as u64;

        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let tails = (0..consumers)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(MarketRing {
            slots,
            mask: capacity - 1,
            capacity,
            head: CachePadded::new(AtomicU64::new(0)),
            tails,
            notify_batch,
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
        });

        let producer = RingProducer {
            shared: Arc::clone(&shared),
            cached_min_tail: 0,
        };
        let consumer_handles = (0..consumers)
            .map(|index| RingConsumer {
                shared: Arc::clone(&shared),
                index,
            })
            .collect();
        (producer, consumer_handles)
    }

    /// Ring capacity (always a power of two).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// The slowest consumer's cursor.
    fn min_tail(&self) -> u64 {
        self.tails
            .iter()
            .map(|t| t.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    fn notify_all(&self) {
        let _guard = self
            .wait_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.wait_cond.notify_all();
    }
}

/// The single producer handle of a [`MarketRing`].
pub struct RingProducer<T> {
    shared: Arc<MarketRing<T>>,
    /// Producer-local cache of the slowest cursor, refreshed only when
    /// the gate trips (avoids N acquire loads per enqueue).
    cached_min_tail: u64,
}

impl<T: Copy + Send> RingProducer<T> {
    /// Enqueues `value`, spinning (with periodic yields) while the ring
    /// is full.
    pub fn enqueue(&mut self, value: T) {
        let backoff = Backoff::new();
        loop {
            if self.try_enqueue(value) {
                return;
            }
            backoff.snooze();
        }
    }

    /// Enqueues `value` if a slot is free. Returns `false` when the
    /// ring is full (slowest consumer has not advanced far enough).
    pub fn try_enqueue(&mut self, value: T) -> bool {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);

        if head.wrapping_sub(self.cached_min_tail) >= shared.capacity {
            self.cached_min_tail = shared.min_tail();
            if head.wrapping_sub(self.cached_min_tail) >= shared.capacity {
                return false;
            }
        }

        let slot = &shared.slots[(head & shared.mask) as usize];
        debug_assert!(
            slot.seq.load(Ordering::Acquire) == head.wrapping_sub(shared.capacity).wrapping_add(1)
                || slot.seq.load(Ordering::Acquire) == head & shared.mask,
            "slot recycled while a consumer still owned it"
        );
        // SAFETY: the capacity gate proved every consumer passed this
        // slot; the producer is the only writer.
        unsafe { (*slot.value.get()).write(value) };
        slot.seq.store(head + 1, Ordering::Release);
        shared.head.store(head + 1, Ordering::Release);

        if shared.notify_batch > 0 && (head + 1) % shared.notify_batch == 0 {
            shared.notify_all();
        }
        true
    }

    /// Wakes all waiting consumers regardless of the notify batch.
    /// Useful when draining before shutdown.
    pub fn notify(&self) {
        self.shared.notify_all();
    }

    /// Items enqueued so far.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.shared.head.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for RingProducer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingProducer")
            .field("head", &self.shared.head.load(Ordering::Relaxed))
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

/// One consumer's handle: an independent cursor over the broadcast
/// stream.
pub struct RingConsumer<T> {
    shared: Arc<MarketRing<T>>,
    index: usize,
}

impl<T: Copy + Send> RingConsumer<T> {
    /// This consumer's index within the ring.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Items currently visible to this consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        let tail = shared.tails[self.index].load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
    }

    /// Returns `true` when nothing is pending for this consumer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops the next item, or `None` when this consumer has seen
    /// everything enqueued so far.
    pub fn dequeue(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let tail = shared.tails[self.index].load(Ordering::Relaxed);
        let slot = &shared.slots[(tail & shared.mask) as usize];
        if slot.seq.load(Ordering::Acquire) != tail + 1 {
            return None;
        }
        // SAFETY: seq == tail + 1 proves the producer finished writing
        // this position, and it cannot recycle the slot until our
        // cursor advances past it. T: Copy makes the duplicate read
        // sound.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        let _ = shared.tails[self.index].compare_exchange(
            tail,
            tail + 1,
            Ordering::Release,
            Ordering::Relaxed,
        );
        Some(value)
    }

    /// Pops up to `out.len()` items with a single cursor store.
    /// Returns the number written.
    pub fn dequeue_batch(&mut self, out: &mut [T]) -> usize {
        let shared = &*self.shared;
        let tail = shared.tails[self.index].load(Ordering::Relaxed);
        let mut count = 0u64;

        while (count as usize) < out.len() {
            let pos = tail + count;
            let slot = &shared.slots[(pos & shared.mask) as usize];
            if slot.seq.load(Ordering::Acquire) != pos + 1 {
                break;
            }
            // SAFETY: as in dequeue().
            out[count as usize] = unsafe { (*slot.value.get()).assume_init_read() };
            count += 1;
        }

        if count > 0 {
            shared.tails[self.index].store(tail + count, Ordering::Release);
        }
        count as usize
    }

    /// Blocks until at least `min_batch` items are pending for this
    /// consumer. Pair with a producer whose `notify_batch` divides the
    /// expected traffic, or call [`RingProducer::notify`] when
    /// draining.
    pub fn wait(&self, min_batch: u64) {
        let shared = &*self.shared;
        let mut guard = shared
            .wait_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let head = shared.head.load(Ordering::Acquire);
            let tail = shared.tails[self.index].load(Ordering::Relaxed);
            if head.saturating_sub(tail) >= min_batch {
                return;
            }
            guard = shared
                .wait_cond
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound. Returns `true`
    /// when the batch condition was met, `false` on timeout.
    pub fn wait_timeout(&self, min_batch: u64, timeout: Duration) -> bool {
        let shared = &*self.shared;
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = shared
            .wait_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let head = shared.head.load(Ordering::Acquire);
            let tail = shared.tails[self.index].load(Ordering::Relaxed);
            if head.saturating_sub(tail) >= min_batch {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _result) = shared
                .wait_cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = g;
        }
    }
}

impl<T> std::fmt::Debug for RingConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingConsumer")
            .field("index", &self.index)
            .field(
                "tail",
                &self.shared.tails[self.index].load(Ordering::Relaxed),
            )
            .finish()
    }
}

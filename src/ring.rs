//! Lock-free MPSC intent ring
//!
//! Bounded power-of-two queue moving `Intent` records from producer threads
//! (feeds, strategies) to the single per-symbol consumer. No allocation and
//! no syscalls after construction; `push` and `try_pop` never block.
//!
//! # Synchronization protocol
//!
//! Two unbounded u64 counters: `tail` (producers, CAS-claimed) and `head`
//! (consumer only). Buffer index is `counter & (capacity - 1)`. Each slot
//! carries a sequence stamp so a producer's slot write is release-published
//! to the consumer independently of the tail counter; the consumer never
//! observes a claimed-but-unwritten slot.
//!
//! - slot.seq == pos            slot free for the producer claiming `pos`
//! - slot.seq == pos + 1        slot holds the value pushed at `pos`
//! - slot.seq == pos + capacity slot consumed, free for the next lap
//!
//! FIFO: the tail CAS totally orders successful pushes, so a push that
//! returns before another push starts is popped first.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::intent::Intent;

struct Slot {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<Intent>>,
}

/// Bounded lock-free many-producer / single-consumer queue of intents.
pub struct IntentRing {
    /// Producer cursor. Own cache line to keep producer CAS traffic away
    /// from the consumer's head line.
    tail: CachePadded<AtomicU64>,
    /// Consumer cursor. Written only by the single consumer.
    head: CachePadded<AtomicU64>,
    buffer: Box<[Slot]>,
    mask: u64,
}

// Slots are handed off between threads through the seq protocol above.
unsafe impl Send for IntentRing {}
unsafe impl Sync for IntentRing {}

impl IntentRing {
    /// Create a ring with the given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two. Construction-time
    /// only; validated earlier by `Config::validate`.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "ring capacity must be a power of two, got {capacity}"
        );
        let buffer: Box<[Slot]> = (0..capacity as u64)
            .map(|i| Slot {
                seq: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            buffer,
            mask: capacity as u64 - 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Items currently queued. Racy by nature; exact only when quiescent.
    #[inline]
    pub fn len(&self) -> u64 {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push an intent. Returns false when the ring is full; the caller
    /// decides whether to drop, retry or back-pressure upstream.
    ///
    /// Safe to call from any number of producer threads concurrently.
    #[inline]
    pub fn push(&self, intent: Intent) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= self.buffer.len() as u64 {
                return false;
            }

            let slot = &self.buffer[(tail & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);

            if seq == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(intent) };
                        slot.seq.store(tail + 1, Ordering::Release);
                        return true;
                    }
                    Err(observed) => tail = observed,
                }
            } else if seq < tail {
                // Previous-lap value not yet consumed: full.
                return false;
            } else {
                // Another producer claimed this position; re-read the tail.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the next intent, if any.
    ///
    /// Must only be called from the single consumer thread.
    #[inline]
    pub fn try_pop(&self) -> Option<Intent> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.buffer[(head & self.mask) as usize];
        let seq = slot.seq.load(Ordering::Acquire);

        if seq != head + 1 {
            // Either empty, or the producer at `head` has claimed but not
            // yet published its slot.
            return None;
        }

        let intent = unsafe { (*slot.value.get()).assume_init_read() };
        slot.seq
            .store(head + self.buffer.len() as u64, Ordering::Release);
        self.head.store(head + 1, Ordering::Release);
        Some(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Side;
    use std::sync::Arc;

    fn intent(ts: u64) -> Intent {
        Intent::new(Side::Buy, "XAUUSD", 1.0, ts)
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_pow2_capacity() {
        let _ = IntentRing::with_capacity(6);
    }

    #[test]
    fn push_pop_single() {
        let ring = IntentRing::with_capacity(8);
        assert!(ring.try_pop().is_none());
        assert!(ring.push(intent(1)));
        let out = ring.try_pop().expect("one item queued");
        assert_eq!(out.ts_ns, 1);
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn saturation_then_drain() {
        // Scenario: C=4, fifth push fails, one pop frees a slot.
        let ring = IntentRing::with_capacity(4);
        for i in 0..4 {
            assert!(ring.push(intent(i)), "push {i} into empty ring");
        }
        assert!(!ring.push(intent(4)), "fifth push must fail");
        assert_eq!(ring.len(), 4);

        assert_eq!(ring.try_pop().unwrap().ts_ns, 0);
        assert!(ring.push(intent(4)), "push succeeds after one pop");

        for expect in 1..=4 {
            assert_eq!(ring.try_pop().unwrap().ts_ns, expect);
        }
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn fifo_single_producer() {
        let ring = IntentRing::with_capacity(128);
        for i in 0..100 {
            assert!(ring.push(intent(i)));
        }
        for i in 0..100 {
            assert_eq!(ring.try_pop().unwrap().ts_ns, i);
        }
    }

    #[test]
    fn capacity_bound_holds() {
        let ring = IntentRing::with_capacity(8);
        for round in 0..50u64 {
            assert!(ring.push(intent(round)));
            assert!(ring.len() <= 8);
            if round % 2 == 0 {
                ring.try_pop();
            }
        }
        assert!(ring.len() <= 8);
    }

    #[test]
    fn per_producer_fifo_under_contention() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 10_000;

        let ring = Arc::new(IntentRing::with_capacity(1024));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    // Encode producer id in the high bits, sequence in the low.
                    let ts = (p << 32) | i;
                    while !ring.push(intent(ts)) {
                        std::hint::spin_loop();
                    }
                }
            }));
        }

        // Single consumer drains while producers run.
        let mut last_seen = [0u64; PRODUCERS as usize];
        let mut counts = [0u64; PRODUCERS as usize];
        let mut total = 0;
        while total < PRODUCERS * PER_PRODUCER {
            if let Some(out) = ring.try_pop() {
                let p = (out.ts_ns >> 32) as usize;
                let seq = out.ts_ns & 0xffff_ffff;
                if counts[p] > 0 {
                    assert!(
                        seq > last_seen[p],
                        "producer {p} reordered: {seq} after {}",
                        last_seen[p]
                    );
                }
                last_seen[p] = seq;
                counts[p] += 1;
                total += 1;
            } else {
                std::hint::spin_loop();
            }
        }

        for h in handles {
            h.join().unwrap();
        }
        assert!(ring.try_pop().is_none());
        assert_eq!(counts, [PER_PRODUCER; PRODUCERS as usize]);
    }
}

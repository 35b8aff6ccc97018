//! Time sources
//!
//! All core components take time as an explicit `now_ns` argument or through
//! the `Clock` trait; nothing on the hot path calls system time directly.
//! `MonotonicClock` wraps `quanta` for production; `ManualClock` gives tests
//! deterministic control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const NANOS_PER_MICRO: u64 = 1_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Monotonic nanosecond time source.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;

    #[inline]
    fn now_ms(&self) -> u64 {
        self.now_ns() / NANOS_PER_MILLI
    }
}

/// Production clock backed by `quanta` (TSC where available, with OS
/// fallback). Reports nanoseconds since construction; monotonic by
/// construction.
pub struct MonotonicClock {
    inner: quanta::Clock,
    origin: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let inner = quanta::Clock::new();
        let origin = inner.raw();
        Self { inner, origin }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.inner.delta_as_nanos(self.origin, self.inner.raw())
    }
}

/// Manually-advanced clock for deterministic tests. Never moves backward.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    pub fn advance_ns(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.advance_ns(delta_ms * NANOS_PER_MILLI);
    }

    pub fn set_ns(&self, ts: u64) {
        let prev = self.now.swap(ts, Ordering::Relaxed);
        debug_assert!(ts >= prev, "manual clock cannot go backward");
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

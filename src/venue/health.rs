//! Per-venue health state
//!
//! Single authoritative health snapshot of one venue. Updated by feed and
//! order-callback threads, read by the executor on every intent. All fields
//! are independent atomics: readers may see slightly stale values but never
//! a torn state. No allocation, no locks, no syscalls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Health thresholds for the combined `can_trade` check.
#[derive(Debug, Clone, Copy)]
pub struct VenueHealthConfig {
    pub staleness_max_ns: u64,
    pub latency_max_ns: u64,
    pub reject_max: u64,
}

impl Default for VenueHealthConfig {
    fn default() -> Self {
        Self {
            staleness_max_ns: 5_000_000_000, // 5s
            latency_max_ns: 500_000_000,     // 500ms
            reject_max: 10,
        }
    }
}

/// Lock-free venue health tracker.
///
/// Hot-path fields that are written by one thread and read by others sit on
/// their own cache lines via the atomics' natural grouping; the heavy
/// writers (`last_ws_ts_ns`, `messages`) are separated from the reject
/// counter updated by the order path.
pub struct VenueHealth {
    ws_alive: AtomicBool,
    rest_alive: AtomicBool,
    last_ws_ts_ns: AtomicU64,
    last_rest_ts_ns: AtomicU64,
    reject_count: AtomicU64,
    latency_ns: AtomicU64,
    messages: AtomicU64,
}

/// Individually-consistent copy of the health fields.
#[derive(Debug, Clone, Serialize)]
pub struct VenueHealthSnapshot {
    pub ws_alive: bool,
    pub rest_alive: bool,
    pub last_ws_ns: u64,
    pub last_rest_ns: u64,
    pub reject_count: u64,
    pub latency_ns: u64,
    pub messages: u64,
}

impl VenueHealth {
    pub fn new() -> Self {
        Self {
            ws_alive: AtomicBool::new(false),
            rest_alive: AtomicBool::new(false),
            last_ws_ts_ns: AtomicU64::new(0),
            last_rest_ts_ns: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
            latency_ns: AtomicU64::new(0),
            messages: AtomicU64::new(0),
        }
    }

    // --- feed updates (connection threads) ---

    #[inline]
    pub fn mark_ws_alive(&self, ts_ns: u64) {
        self.ws_alive.store(true, Ordering::Release);
        // fetch_max keeps the timestamp monotone even with racing updaters.
        self.last_ws_ts_ns.fetch_max(ts_ns, Ordering::AcqRel);
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn mark_ws_dead(&self) {
        self.ws_alive.store(false, Ordering::Release);
    }

    #[inline]
    pub fn mark_rest_alive(&self, ts_ns: u64) {
        self.rest_alive.store(true, Ordering::Release);
        self.last_rest_ts_ns.fetch_max(ts_ns, Ordering::AcqRel);
    }

    #[inline]
    pub fn mark_rest_dead(&self) {
        self.rest_alive.store(false, Ordering::Release);
    }

    #[inline]
    pub fn update_latency(&self, latency_ns: u64) {
        self.latency_ns.store(latency_ns, Ordering::Release);
    }

    // --- execution feedback (order sender) ---

    #[inline]
    pub fn record_reject(&self) {
        self.reject_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_rejects(&self) {
        self.reject_count.store(0, Ordering::Relaxed);
    }

    // --- hot-path readers ---

    #[inline]
    pub fn ws_alive(&self) -> bool {
        self.ws_alive.load(Ordering::Acquire)
    }

    #[inline]
    pub fn rest_alive(&self) -> bool {
        self.rest_alive.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_ws_ts_ns(&self) -> u64 {
        self.last_ws_ts_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn latency_ns(&self) -> u64 {
        self.latency_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reject_count(&self) -> u64 {
        self.reject_count.load(Ordering::Relaxed)
    }

    /// WS alive and not stale.
    #[inline]
    pub fn healthy(&self, now_ns: u64, staleness_max_ns: u64) -> bool {
        self.ws_alive() && now_ns.saturating_sub(self.last_ws_ts_ns()) < staleness_max_ns
    }

    #[inline]
    pub fn latency_ok(&self, latency_max_ns: u64) -> bool {
        self.latency_ns() < latency_max_ns
    }

    #[inline]
    pub fn too_many_rejects(&self, reject_max: u64) -> bool {
        self.reject_count() >= reject_max
    }

    /// Combined pre-trade health check.
    #[inline]
    pub fn can_trade(&self, now_ns: u64, cfg: &VenueHealthConfig) -> bool {
        self.healthy(now_ns, cfg.staleness_max_ns)
            && self.latency_ok(cfg.latency_max_ns)
            && !self.too_many_rejects(cfg.reject_max)
    }

    /// Alive but impaired: stale feed or latency over the limit. Used by the
    /// arbiter for the half-size venue tier.
    #[inline]
    pub fn degraded(&self, now_ns: u64, cfg: &VenueHealthConfig) -> bool {
        self.ws_alive()
            && (!self.healthy(now_ns, cfg.staleness_max_ns) || !self.latency_ok(cfg.latency_max_ns))
    }

    pub fn snapshot(&self) -> VenueHealthSnapshot {
        VenueHealthSnapshot {
            ws_alive: self.ws_alive(),
            rest_alive: self.rest_alive(),
            last_ws_ns: self.last_ws_ts_ns(),
            last_rest_ns: self.last_rest_ts_ns.load(Ordering::Acquire),
            reject_count: self.reject_count(),
            latency_ns: self.latency_ns(),
            messages: self.messages.load(Ordering::Relaxed),
        }
    }
}

impl Default for VenueHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn fresh_venue_is_unhealthy() {
        let v = VenueHealth::new();
        assert!(!v.healthy(0, 5 * SEC));
        assert!(!v.can_trade(0, &VenueHealthConfig::default()));
    }

    #[test]
    fn alive_and_fresh_trades() {
        let cfg = VenueHealthConfig::default();
        let v = VenueHealth::new();
        v.mark_ws_alive(10 * SEC);
        v.update_latency(1_000_000);
        assert!(v.can_trade(11 * SEC, &cfg));
    }

    #[test]
    fn staleness_blocks() {
        let cfg = VenueHealthConfig::default();
        let v = VenueHealth::new();
        v.mark_ws_alive(10 * SEC);
        assert!(!v.can_trade(20 * SEC, &cfg));
        assert!(v.degraded(20 * SEC, &cfg));
    }

    #[test]
    fn timestamps_are_monotone() {
        let v = VenueHealth::new();
        v.mark_ws_alive(100);
        v.mark_ws_alive(50); // late-arriving older event
        assert_eq!(v.last_ws_ts_ns(), 100);
    }

    #[test]
    fn reject_fuse() {
        let cfg = VenueHealthConfig {
            reject_max: 3,
            ..Default::default()
        };
        let v = VenueHealth::new();
        v.mark_ws_alive(SEC);
        for _ in 0..3 {
            v.record_reject();
        }
        assert!(v.too_many_rejects(3));
        assert!(!v.can_trade(SEC + 1, &cfg));
        v.reset_rejects();
        assert!(v.can_trade(SEC + 1, &cfg));
    }
}

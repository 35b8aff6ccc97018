//! Daily loss guard
//!
//! Cross-engine realized-PnL accumulator with a trip latch. Both engines
//! report fills here; once the combined PnL crosses below the limit, the
//! guard trips and stays tripped until an operator reset.
//!
//! PnL is accumulated as an integer in micro-currency units so the hot path
//! is a single `fetch_add`; no floating-point CAS loop.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::Serialize;
use tracing::warn;

const MICROS_PER_UNIT: f64 = 1_000_000.0;

#[inline]
fn to_micros(v: f64) -> i64 {
    (v * MICROS_PER_UNIT).round() as i64
}

#[inline]
fn from_micros(v: i64) -> f64 {
    v as f64 / MICROS_PER_UNIT
}

/// Atomic daily PnL guard shared across engines.
pub struct DailyLossGuard {
    /// Positive loss limit in micro-units (hot-swappable from control path).
    limit_micros: AtomicI64,
    pnl_micros: AtomicI64,
    tripped: AtomicBool,
    trip_ts_ns: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LossGuardSnapshot {
    pub pnl: f64,
    pub limit: f64,
    pub tripped: bool,
    pub trip_ts_ns: u64,
    pub drawdown_used: f64,
}

impl DailyLossGuard {
    /// `limit` is the maximum tolerated daily loss, expressed positive.
    pub fn new(limit: f64) -> Self {
        debug_assert!(limit > 0.0, "loss limit must be positive");
        Self {
            limit_micros: AtomicI64::new(to_micros(limit)),
            pnl_micros: AtomicI64::new(0),
            tripped: AtomicBool::new(false),
            trip_ts_ns: AtomicU64::new(0),
        }
    }

    /// Fast hot-path read: may we trade?
    #[inline]
    pub fn allow(&self) -> bool {
        !self.tripped.load(Ordering::Relaxed)
    }

    /// Record a realized fill PnL. Called from venue callback threads.
    pub fn on_fill(&self, pnl: f64, now_ns: u64) {
        let total = self.pnl_micros.fetch_add(to_micros(pnl), Ordering::AcqRel) + to_micros(pnl);
        let limit = self.limit_micros.load(Ordering::Relaxed);

        if total < -limit && !self.tripped.load(Ordering::Relaxed) {
            self.trip_ts_ns.store(now_ns, Ordering::Relaxed);
            self.tripped.store(true, Ordering::Release);
            warn!(
                pnl = from_micros(total),
                limit = from_micros(limit),
                "daily loss guard TRIPPED"
            );
        }
    }

    #[inline]
    pub fn pnl(&self) -> f64 {
        from_micros(self.pnl_micros.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn limit(&self) -> f64 {
        from_micros(self.limit_micros.load(Ordering::Relaxed))
    }

    /// Hot-swap the loss limit (operator path).
    pub fn set_limit(&self, limit: f64) {
        self.limit_micros.store(to_micros(limit), Ordering::Relaxed);
    }

    #[inline]
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn trip_timestamp_ns(&self) -> u64 {
        self.trip_ts_ns.load(Ordering::Relaxed)
    }

    /// Fraction of the loss budget consumed, in [0, 1].
    pub fn drawdown_used(&self) -> f64 {
        let pnl = self.pnl_micros.load(Ordering::Relaxed);
        if pnl >= 0 {
            return 0.0;
        }
        let limit = self.limit_micros.load(Ordering::Relaxed);
        if limit <= 0 {
            return 0.0;
        }
        ((-pnl) as f64 / limit as f64).min(1.0)
    }

    /// Remaining loss budget as a fraction in [0, 1].
    pub fn buffer_remaining(&self) -> f64 {
        1.0 - self.drawdown_used()
    }

    /// Sub-blocking throttle factor: `max(0, 1 - dd_used^exponent)`.
    pub fn throttle_factor(&self, exponent: f64) -> f64 {
        let dd = self.drawdown_used();
        (1.0 - dd.powf(exponent)).max(0.0)
    }

    /// Reset for a new trading day. Control path only; never call from a
    /// hot thread.
    pub fn reset(&self) {
        self.pnl_micros.store(0, Ordering::Relaxed);
        self.tripped.store(false, Ordering::Relaxed);
        self.trip_ts_ns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LossGuardSnapshot {
        LossGuardSnapshot {
            pnl: self.pnl(),
            limit: self.limit(),
            tripped: self.tripped(),
            trip_ts_ns: self.trip_timestamp_ns(),
            drawdown_used: self.drawdown_used(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_trips() {
        let guard = DailyLossGuard::new(500.0);
        assert!(guard.allow());

        guard.on_fill(-200.0, 10);
        assert!(guard.allow());
        assert_eq!(guard.pnl(), -200.0);

        guard.on_fill(-301.0, 20);
        assert!(!guard.allow());
        assert!(guard.tripped());
        assert_eq!(guard.trip_timestamp_ns(), 20);
    }

    #[test]
    fn trip_is_monotone_until_reset() {
        let guard = DailyLossGuard::new(100.0);
        guard.on_fill(-150.0, 1);
        assert!(!guard.allow());

        // Winning back does not untrip.
        guard.on_fill(500.0, 2);
        assert!(!guard.allow());

        guard.reset();
        assert!(guard.allow());
        assert_eq!(guard.pnl(), 0.0);
        assert_eq!(guard.trip_timestamp_ns(), 0);
    }

    #[test]
    fn drawdown_and_throttle() {
        let guard = DailyLossGuard::new(1000.0);
        assert_eq!(guard.drawdown_used(), 0.0);
        assert_eq!(guard.throttle_factor(2.0), 1.0);

        guard.on_fill(-500.0, 1);
        assert!((guard.drawdown_used() - 0.5).abs() < 1e-9);
        assert!((guard.throttle_factor(2.0) - 0.75).abs() < 1e-9);

        guard.on_fill(-600.0, 2);
        assert_eq!(guard.drawdown_used(), 1.0);
        assert_eq!(guard.throttle_factor(2.0), 0.0);
    }

    #[test]
    fn positive_pnl_has_no_drawdown() {
        let guard = DailyLossGuard::new(100.0);
        guard.on_fill(250.0, 1);
        assert_eq!(guard.drawdown_used(), 0.0);
        assert_eq!(guard.buffer_remaining(), 1.0);
    }
}

//! Exchange truth reconciliation and drift kill
//!
//! `ExchangeTruth` holds the last known per-symbol position as reported by
//! the exchange (REST snapshot or fill callback). `DriftDetector` compares
//! the local book against that truth; a mismatch beyond tolerance latches a
//! kill that only an operator can clear. Hot threads observe the kill, they
//! never clear it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

/// Last position the exchange reported for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub qty: f64,
    pub entry_price: f64,
}

/// Per-symbol exchange position store. One lock; written from the REST
/// snapshot poller and the fill callback thread, read by the drift check.
pub struct ExchangeTruth {
    positions: Mutex<HashMap<String, ExchangePosition>>,
}

impl ExchangeTruth {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn on_exchange_position(&self, pos: ExchangePosition) {
        self.positions.lock().insert(pos.symbol.clone(), pos);
    }

    pub fn position(&self, symbol: &str) -> Option<ExchangePosition> {
        self.positions.lock().get(symbol).cloned()
    }

    /// True when the exchange view differs from `local_qty` by more than
    /// `tolerance`. Unknown symbols are not drift; absence of truth must
    /// not kill the system at startup.
    pub fn drift_detected(&self, symbol: &str, local_qty: f64, tolerance: f64) -> bool {
        let positions = self.positions.lock();
        match positions.get(symbol) {
            Some(pos) => (pos.qty - local_qty).abs() > tolerance,
            None => false,
        }
    }
}

impl Default for ExchangeTruth {
    fn default() -> Self {
        Self::new()
    }
}

/// Latched kill switch over local-vs-exchange position drift.
pub struct DriftDetector {
    killed: AtomicBool,
}

impl DriftDetector {
    pub fn new() -> Self {
        Self {
            killed: AtomicBool::new(false),
        }
    }

    /// Compare local book to exchange truth; latch the kill on mismatch.
    /// Returns true if drift was detected on this call.
    pub fn check(&self, truth: &ExchangeTruth, symbol: &str, local_qty: f64, tolerance: f64) -> bool {
        if truth.drift_detected(symbol, local_qty, tolerance) {
            if !self.killed.swap(true, Ordering::AcqRel) {
                error!(symbol, local_qty, tolerance, "position drift KILL latched");
            }
            true
        } else {
            false
        }
    }

    /// External kill trigger (book desync, corrupt feed). Latches with a
    /// logged reason.
    pub fn trigger(&self, reason: &str) {
        if !self.killed.swap(true, Ordering::AcqRel) {
            error!(reason, "drift KILL triggered");
        }
    }

    #[inline]
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    /// Human-gated kill-clear path. The operator confirms positions are
    /// reconciled before calling; the clear is logged so the re-arm is
    /// auditable. Never called from hot threads.
    pub fn clear_kill(&self) {
        self.killed.store(false, Ordering::Release);
        info!("drift kill cleared by operator; re-arm sequence available");
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new()
    }
}

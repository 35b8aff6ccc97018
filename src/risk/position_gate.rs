//! Position gate
//!
//! Atomic position checking at the submission choke point. All position
//! deltas flow through this gate; the lock is held for the entire
//! check-and-reserve so a cap violation is impossible by construction.
//! Engines may check caps as a courtesy, but this gate is authoritative.
//!
//! The capital allocator bounds notional exposure; this gate bounds signed
//! quantity per symbol. They are independent limits.

use std::collections::HashMap;

use parking_lot::Mutex;

pub struct PositionGate {
    max_position_per_symbol: f64,
    positions: Mutex<HashMap<String, f64>>,
}

impl PositionGate {
    pub fn new(max_position_per_symbol: f64) -> Self {
        Self {
            max_position_per_symbol,
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Would adding this signed delta breach the cap?
    pub fn would_violate(&self, symbol: &str, signed_qty: f64) -> bool {
        let positions = self.positions.lock();
        let current = positions.get(symbol).copied().unwrap_or(0.0);
        (current + signed_qty).abs() > self.max_position_per_symbol
    }

    /// Unconditional reserve; call only after `try_reserve` or an external
    /// pre-check has passed.
    pub fn reserve(&self, symbol: &str, signed_qty: f64) {
        let mut positions = self.positions.lock();
        *positions.entry(symbol.to_string()).or_insert(0.0) += signed_qty;
    }

    /// Atomic check-and-reserve: the cap check and the position update
    /// happen under one lock acquisition. Returns false (and changes
    /// nothing) when the delta would breach the cap.
    pub fn try_reserve(&self, symbol: &str, signed_qty: f64) -> bool {
        let mut positions = self.positions.lock();
        let entry = positions.entry(symbol.to_string()).or_insert(0.0);
        if (*entry + signed_qty).abs() > self.max_position_per_symbol {
            return false;
        }
        *entry += signed_qty;
        true
    }

    /// Back out a prior reserve (reject or cancel before fill).
    pub fn unreserve(&self, symbol: &str, signed_qty: f64) {
        self.reserve(symbol, -signed_qty);
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.lock().get(symbol).copied().unwrap_or(0.0)
    }

    /// Overwrite from reconciliation.
    pub fn set_position(&self, symbol: &str, position: f64) {
        self.positions.lock().insert(symbol.to_string(), position);
    }
}

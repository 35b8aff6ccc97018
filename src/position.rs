//! Position accounting
//!
//! Signed net position per symbol with quantity-weighted average price.
//! Crossing through zero realizes PnL on the closed portion and restarts
//! the average at the crossing fill's price.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

/// One symbol's position state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SymbolPosition {
    pub net_qty: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub fees: f64,
}

impl SymbolPosition {
    /// Apply one signed fill. Positive qty buys, negative sells.
    pub fn apply_fill(&mut self, signed_qty: f64, price: f64, fee: f64) {
        self.fees += fee;

        if self.net_qty == 0.0 || self.net_qty.signum() == signed_qty.signum() {
            // Extending (or opening): weight the average by quantity.
            let total = self.net_qty.abs() + signed_qty.abs();
            if total > 0.0 {
                self.avg_price =
                    (self.avg_price * self.net_qty.abs() + price * signed_qty.abs()) / total;
            }
            self.net_qty += signed_qty;
            return;
        }

        // Reducing or crossing: realize PnL on the closed portion.
        let closing = signed_qty.abs().min(self.net_qty.abs());
        let direction = self.net_qty.signum();
        self.realized_pnl += (price - self.avg_price) * closing * direction;

        let next = self.net_qty + signed_qty;
        if next == 0.0 {
            self.net_qty = 0.0;
            self.avg_price = 0.0;
        } else if next.signum() == direction {
            // Partial reduction: average unchanged.
            self.net_qty = next;
        } else {
            // Crossed through zero: the remainder opened at this fill.
            self.net_qty = next;
            self.avg_price = price;
        }
    }

    /// Mark-to-market PnL of the open quantity.
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        (mark_price - self.avg_price) * self.net_qty
    }

    pub fn is_flat(&self) -> bool {
        self.net_qty == 0.0
    }
}

/// All symbols' positions behind one map lock. Updated from the fill
/// callback thread; read by control paths and drift checks.
pub struct PositionBook {
    positions: Mutex<HashMap<String, SymbolPosition>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn on_fill(&self, symbol: &str, signed_qty: f64, price: f64, fee: f64) {
        let mut positions = self.positions.lock();
        positions
            .entry(symbol.to_string())
            .or_default()
            .apply_fill(signed_qty, price, fee);
    }

    pub fn position(&self, symbol: &str) -> SymbolPosition {
        self.positions
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    pub fn net_qty(&self, symbol: &str) -> f64 {
        self.position(symbol).net_qty
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.lock().values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_fees(&self) -> f64 {
        self.positions.lock().values().map(|p| p.fees).sum()
    }

    pub fn snapshot(&self) -> Vec<(String, SymbolPosition)> {
        self.positions
            .lock()
            .iter()
            .map(|(sym, pos)| (sym.clone(), *pos))
            .collect()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

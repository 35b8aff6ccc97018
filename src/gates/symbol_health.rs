//! Per-symbol health tracking
//!
//! Rolling win-rate based auto-disable. A symbol that keeps losing gets
//! pulled from the rotation without operator action; operators can also
//! disable and re-enable symbols manually through the control plane.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Auto-disable threshold: 10+ trades with win rate below 35%.
const MIN_TRADES_FOR_DISABLE: u32 = 10;
const MIN_WIN_RATE: f64 = 0.35;

#[derive(Debug, Default, Clone)]
struct SymbolStats {
    trades: u32,
    wins: u32,
    pnl: f64,
    manually_disabled: bool,
}

impl SymbolStats {
    fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    fn unhealthy(&self) -> bool {
        self.trades >= MIN_TRADES_FOR_DISABLE && self.win_rate() < MIN_WIN_RATE
    }
}

/// Copyable view for telemetry and the control plane.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolHealthSnapshot {
    pub trades: u32,
    pub wins: u32,
    pub pnl: f64,
    pub win_rate: f64,
    pub manually_disabled: bool,
    pub unhealthy: bool,
}

/// Tracks trade outcomes per symbol behind a single map lock. Accessed by
/// executors on exit (cold relative to the tick path) and by control paths.
pub struct SymbolHealthTracker {
    stats: Mutex<HashMap<String, SymbolStats>>,
}

impl SymbolHealthTracker {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_trade(&self, symbol: &str, win: bool, pnl: f64) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(symbol.to_string()).or_default();
        let was_healthy = !entry.unhealthy();
        entry.trades += 1;
        if win {
            entry.wins += 1;
        }
        entry.pnl += pnl;
        if was_healthy && entry.unhealthy() {
            info!(
                symbol,
                trades = entry.trades,
                win_rate = entry.win_rate(),
                "symbol auto-disabled on win-rate"
            );
        }
    }

    /// Unknown symbols default to enabled.
    pub fn enabled(&self, symbol: &str) -> bool {
        let stats = self.stats.lock();
        match stats.get(symbol) {
            None => true,
            Some(s) => !s.manually_disabled && !s.unhealthy(),
        }
    }

    pub fn set_enabled(&self, symbol: &str, enabled: bool) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(symbol.to_string()).or_default();
        entry.manually_disabled = !enabled;
        info!(symbol, enabled, "symbol enable flag set by operator");
    }

    /// Clear statistics for a fresh day. Manual disables survive the reset.
    pub fn nightly_reset(&self) {
        let mut stats = self.stats.lock();
        for s in stats.values_mut() {
            s.trades = 0;
            s.wins = 0;
            s.pnl = 0.0;
        }
    }

    pub fn snapshot(&self, symbol: &str) -> SymbolHealthSnapshot {
        let stats = self.stats.lock();
        match stats.get(symbol) {
            None => SymbolHealthSnapshot::default(),
            Some(s) => SymbolHealthSnapshot {
                trades: s.trades,
                wins: s.wins,
                pnl: s.pnl,
                win_rate: s.win_rate(),
                manually_disabled: s.manually_disabled,
                unhealthy: s.unhealthy(),
            },
        }
    }

    pub fn all_snapshots(&self) -> Vec<(String, SymbolHealthSnapshot)> {
        let stats = self.stats.lock();
        stats
            .iter()
            .map(|(sym, s)| {
                (
                    sym.clone(),
                    SymbolHealthSnapshot {
                        trades: s.trades,
                        wins: s.wins,
                        pnl: s.pnl,
                        win_rate: s.win_rate(),
                        manually_disabled: s.manually_disabled,
                        unhealthy: s.unhealthy(),
                    },
                )
            })
            .collect()
    }
}

impl Default for SymbolHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

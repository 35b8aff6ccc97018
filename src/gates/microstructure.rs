//! Microstructure stress monitor
//!
//! Consumes trade prints and distills them into the single stress score
//! that drives the delta gate: order-flow imbalance plus volume burst
//! relative to a slow baseline. Both inputs are damped so the gate does
//! not flap on every print.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::feed::TradeUpdate;
use crate::gates::delta::DeltaGate;
use crate::hysteresis::{HoldHysteresis, ThresholdHysteresis};

/// Rolling trade window length.
const WINDOW_NS: u64 = 2_000_000_000; // 2s

/// Burst detector band: on above 2x baseline volume, off below 1.2x.
const BURST_ON_RATIO: f64 = 2.0;
const BURST_OFF_RATIO: f64 = 1.2;

/// Minimum hold before the published stress may change regime direction.
const STRESS_HOLD_MS: u64 = 500;

/// Baseline volume EWMA smoothing.
const BASELINE_ALPHA: f64 = 0.02;

/// Weights of the two stress components.
const IMBALANCE_WEIGHT: f64 = 0.6;
const BURST_WEIGHT: f64 = 0.4;

/// Single-writer monitor: owned by the trade-feed thread; publishes into
/// the shared `DeltaGate` atomically.
pub struct MicrostructureMonitor {
    gate: Arc<DeltaGate>,
    trades: VecDeque<(u64, f64)>,
    window_volume: f64,
    baseline_volume: f64,
    burst: ThresholdHysteresis,
    elevated: HoldHysteresis,
    last_stress: f64,
}

impl MicrostructureMonitor {
    pub fn new(gate: Arc<DeltaGate>) -> Self {
        Self {
            gate,
            trades: VecDeque::new(),
            window_volume: 0.0,
            baseline_volume: 0.0,
            burst: ThresholdHysteresis::new(BURST_ON_RATIO, BURST_OFF_RATIO),
            elevated: HoldHysteresis::new(false, 0, STRESS_HOLD_MS),
            last_stress: 0.0,
        }
    }

    /// Ingest one trade print and refresh the gate.
    pub fn on_trade(&mut self, trade: &TradeUpdate) {
        let signed = if trade.is_buy { trade.qty } else { -trade.qty };
        self.trades.push_back((trade.ts_ns, signed));
        self.window_volume += trade.qty;

        while let Some(&(ts, qty)) = self.trades.front() {
            if trade.ts_ns.saturating_sub(ts) <= WINDOW_NS {
                break;
            }
            self.window_volume -= qty.abs();
            self.trades.pop_front();
        }

        let stress = self.compute_stress(trade.ts_ns);
        self.last_stress = stress;
        self.gate.set_from_stress(stress);
    }

    fn compute_stress(&mut self, now_ns: u64) -> f64 {
        if self.window_volume <= 0.0 {
            return 0.0;
        }

        let net: f64 = self.trades.iter().map(|&(_, q)| q).sum();
        let imbalance = (net.abs() / self.window_volume).clamp(0.0, 1.0);

        let ratio = if self.baseline_volume > 0.0 {
            self.window_volume / self.baseline_volume
        } else {
            1.0
        };
        let bursting = self.burst.update(ratio);
        let burst_score = if bursting { 1.0 } else { 0.0 };

        // The baseline adapts only outside bursts; a sustained burst must
        // not become its own normal.
        if !bursting {
            self.baseline_volume = if self.baseline_volume == 0.0 {
                self.window_volume
            } else {
                (1.0 - BASELINE_ALPHA) * self.baseline_volume
                    + BASELINE_ALPHA * self.window_volume
            };
        }

        let raw = IMBALANCE_WEIGHT * imbalance + BURST_WEIGHT * burst_score;

        // Entering an elevated regime holds for a minimum period so the
        // gate does not flap between calm prints.
        let elevated = self.elevated.update(raw >= 0.5, now_ns / 1_000_000);
        if elevated {
            raw.max(0.5).clamp(0.0, 1.0)
        } else {
            raw.min(0.49)
        }
    }

    pub fn stress(&self) -> f64 {
        self.last_stress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::delta::GateState;
    use crate::intent::SymbolCode;

    const MS: u64 = 1_000_000;

    fn trade(qty: f64, is_buy: bool, ts_ms: u64) -> TradeUpdate {
        TradeUpdate {
            symbol: SymbolCode::new("XAUUSD"),
            qty,
            is_buy,
            ts_ns: ts_ms * MS,
        }
    }

    fn monitor() -> (Arc<DeltaGate>, MicrostructureMonitor) {
        let gate = Arc::new(DeltaGate::new());
        let monitor = MicrostructureMonitor::new(Arc::clone(&gate));
        (gate, monitor)
    }

    #[test]
    fn balanced_flow_stays_open() {
        let (gate, mut m) = monitor();
        for i in 0..200u64 {
            m.on_trade(&trade(1.0, i % 2 == 0, i * 20));
        }
        assert_eq!(gate.state(), GateState::Allow);
        assert!(m.stress() < 0.5);
    }

    #[test]
    fn one_sided_burst_blocks() {
        let (gate, mut m) = monitor();
        // Establish a calm balanced baseline.
        for i in 0..300u64 {
            m.on_trade(&trade(1.0, i % 2 == 0, i * 20));
        }
        assert_eq!(gate.state(), GateState::Allow);

        // Heavy one-sided volume: imbalance plus burst crosses the block
        // line (0.6 x 1.0 + 0.4 x 1.0 under sustained pressure).
        for i in 0..300u64 {
            m.on_trade(&trade(8.0, true, 6_100 + i * 5));
        }
        assert_eq!(gate.state(), GateState::Block);
        assert!(m.stress() >= 0.8);
    }

    #[test]
    fn stress_decays_back_to_allow() {
        let (gate, mut m) = monitor();
        for i in 0..300u64 {
            m.on_trade(&trade(1.0, i % 2 == 0, i * 20));
        }
        for i in 0..300u64 {
            m.on_trade(&trade(8.0, true, 6_100 + i * 5));
        }
        assert_eq!(gate.state(), GateState::Block);

        // Calm, balanced flow for a while releases the gate.
        let resume = 6_100 + 300 * 5 + 10;
        for i in 0..600u64 {
            m.on_trade(&trade(0.5, i % 2 == 0, resume + i * 20));
        }
        assert_eq!(gate.state(), GateState::Allow);
    }
}

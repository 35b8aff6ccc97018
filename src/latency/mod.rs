//! Latency governor
//!
//! Jitter-aware execution gate. Records order ACK round trips (submit
//! timestamp captured at send, ACK timestamp at the user-stream event,
//! keyed by client order id), keeps a rolling window of samples and derives
//! an execution regime with consecutive-sample hysteresis. Per-symbol
//! policies decide which regimes admit entries and time-based exits.
//!
//! Regimes, derived from empirical VPS tail measurements:
//!   FAST:     p95 <= 6ms  and p99 <= 12ms and current <= 8ms
//!   NORMAL:   p95 <= 10ms and p99 <= 18ms and current <= 14ms
//!   DEGRADED: otherwise
//!
//! A regime change requires the new classification to hold for K
//! consecutive samples (K = 10); no single-sample flips.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::hysteresis::CountHysteresis;

/// Samples required to confirm a regime change.
const REGIME_CONFIRM_SAMPLES: u32 = 10;

/// Minimum window occupancy before classification is trusted.
const MIN_SAMPLES: usize = 10;

/// ACK round trips above this are treated as clock artifacts and dropped.
const MAX_SANE_RTT_NS: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LatencyRegime {
    /// Historical normal: trade freely.
    Fast = 0,
    /// Marginal but usable: restrict latency-critical symbols.
    Normal = 1,
    /// Physics says stop: exits only.
    Degraded = 2,
}

impl LatencyRegime {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LatencyRegime::Fast,
            1 => LatencyRegime::Normal,
            _ => LatencyRegime::Degraded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LatencyRegime::Fast => "FAST",
            LatencyRegime::Normal => "NORMAL",
            LatencyRegime::Degraded => "DEGRADED",
        }
    }
}

/// Per-symbol latency tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyPolicy {
    /// Entries only in FAST; time exits only in FAST.
    FastOnly,
    /// Entries blocked only in DEGRADED; time exits always allowed.
    NotDegraded,
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeThresholds {
    pub fast_p95_ms: f64,
    pub fast_p99_ms: f64,
    pub fast_current_ms: f64,
    pub normal_p95_ms: f64,
    pub normal_p99_ms: f64,
    pub normal_current_ms: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            fast_p95_ms: 6.0,
            fast_p99_ms: 12.0,
            fast_current_ms: 8.0,
            normal_p95_ms: 10.0,
            normal_p99_ms: 18.0,
            normal_current_ms: 14.0,
        }
    }
}

struct Window {
    samples: Vec<f64>,
    head: usize,
    count: usize,
    last: f64,
    classifier: CountHysteresis<LatencyRegime>,
}

/// Pending submit timestamps keyed by client order id. Insert on the submit
/// path, erase on the user-stream thread; short critical sections on an
/// otherwise uncontended lock.
struct AckTracker {
    pending: HashMap<u64, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub regime: LatencyRegime,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub current_ms: f64,
    pub samples: usize,
}

/// Rolling RTT window, regime classifier and per-symbol policy table.
pub struct LatencyGovernor {
    window_size: usize,
    thresholds: RegimeThresholds,
    window: Mutex<Window>,
    acks: Mutex<AckTracker>,
    /// Confirmed regime, published for lock-free hot-path reads.
    regime: AtomicU8,
    policies: HashMap<String, LatencyPolicy>,
}

impl LatencyGovernor {
    pub fn new(window_size: usize, thresholds: RegimeThresholds) -> Self {
        let mut policies = HashMap::new();
        // XAU is FAST-only: latency variance kills its expectancy.
        policies.insert("XAUUSD".to_string(), LatencyPolicy::FastOnly);
        // XAG rides a deeper book; blocked only when degraded.
        policies.insert("XAGUSD".to_string(), LatencyPolicy::NotDegraded);

        let window_size = window_size.max(MIN_SAMPLES);
        Self {
            window_size,
            thresholds,
            window: Mutex::new(Window {
                samples: vec![0.0; window_size],
                head: 0,
                count: 0,
                last: 0.0,
                // Start conservative: prove FAST before trusting it.
                classifier: CountHysteresis::new(LatencyRegime::Degraded, REGIME_CONFIRM_SAMPLES),
            }),
            acks: Mutex::new(AckTracker {
                pending: HashMap::new(),
            }),
            regime: AtomicU8::new(LatencyRegime::Degraded as u8),
            policies,
        }
    }

    pub fn set_policy(&mut self, symbol: &str, policy: LatencyPolicy) {
        self.policies.insert(symbol.to_string(), policy);
    }

    // --- ACK RTT measurement ---

    /// Record the submit timestamp for an order. Called at send time.
    pub fn record_submit(&self, client_id: u64, now_ns: u64) {
        self.acks.lock().pending.insert(client_id, now_ns);
    }

    /// ACK observed on the user stream. Unknown ids (shadow orders, replays)
    /// are ignored.
    pub fn on_ack(&self, client_id: u64, now_ns: u64) {
        let submit_ns = {
            let mut acks = self.acks.lock();
            match acks.pending.remove(&client_id) {
                Some(ts) => ts,
                None => return,
            }
        };
        let rtt_ns = now_ns.saturating_sub(submit_ns);
        if rtt_ns > MAX_SANE_RTT_NS {
            return;
        }
        self.record_rtt_ms(rtt_ns as f64 / 1_000_000.0);
    }

    /// Drop a pending submit (order rejected before ACK).
    pub fn forget_submit(&self, client_id: u64) {
        self.acks.lock().pending.remove(&client_id);
    }

    /// Record one RTT sample and re-classify.
    pub fn record_rtt_ms(&self, rtt_ms: f64) {
        let mut w = self.window.lock();
        let head = w.head;
        w.samples[head] = rtt_ms;
        w.head = (head + 1) % self.window_size;
        if w.count < self.window_size {
            w.count += 1;
        }
        w.last = rtt_ms;

        let raw = self.classify_raw(&w);
        let before = w.classifier.state();
        let confirmed = w.classifier.update(raw);
        if confirmed != before {
            info!(
                from = before.as_str(),
                to = confirmed.as_str(),
                current_ms = rtt_ms,
                "latency regime change"
            );
        }
        self.regime.store(confirmed as u8, Ordering::Release);
    }

    fn classify_raw(&self, w: &Window) -> LatencyRegime {
        if w.count < MIN_SAMPLES {
            return LatencyRegime::Degraded;
        }
        let t = &self.thresholds;
        let p95 = Self::percentile_of(&w.samples[..w.count], 0.95);
        let p99 = Self::percentile_of(&w.samples[..w.count], 0.99);
        let cur = w.last;

        if p95 <= t.fast_p95_ms && p99 <= t.fast_p99_ms && cur <= t.fast_current_ms {
            LatencyRegime::Fast
        } else if p95 <= t.normal_p95_ms && p99 <= t.normal_p99_ms && cur <= t.normal_current_ms {
            LatencyRegime::Normal
        } else {
            LatencyRegime::Degraded
        }
    }

    fn percentile_of(samples: &[f64], p: f64) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p * sorted.len() as f64).ceil() as usize).saturating_sub(1);
        sorted[idx.min(sorted.len() - 1)]
    }

    // --- hot-path reads ---

    /// Confirmed regime; single atomic load.
    #[inline]
    pub fn regime(&self) -> LatencyRegime {
        LatencyRegime::from_u8(self.regime.load(Ordering::Acquire))
    }

    fn policy_for(&self, symbol: &str) -> LatencyPolicy {
        self.policies
            .get(symbol)
            .copied()
            .unwrap_or(LatencyPolicy::NotDegraded)
    }

    /// Entry gate: may this symbol open a position under the current regime?
    pub fn allow_entry(&self, symbol: &str) -> bool {
        match self.policy_for(symbol) {
            LatencyPolicy::FastOnly => self.regime() == LatencyRegime::Fast,
            LatencyPolicy::NotDegraded => self.regime() != LatencyRegime::Degraded,
        }
    }

    /// Time-based exit gate.
    pub fn allow_time_exit(&self, symbol: &str) -> bool {
        match self.policy_for(symbol) {
            LatencyPolicy::FastOnly => self.regime() == LatencyRegime::Fast,
            LatencyPolicy::NotDegraded => true,
        }
    }

    // --- statistics (cold) ---

    pub fn percentile(&self, p: f64) -> f64 {
        let w = self.window.lock();
        Self::percentile_of(&w.samples[..w.count], p)
    }

    pub fn p50(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p90(&self) -> f64 {
        self.percentile(0.90)
    }

    pub fn p95(&self) -> f64 {
        self.percentile(0.95)
    }

    pub fn p99(&self) -> f64 {
        self.percentile(0.99)
    }

    pub fn current(&self) -> f64 {
        self.window.lock().last
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let w = self.window.lock();
        let filled = &w.samples[..w.count];
        LatencySnapshot {
            regime: self.regime(),
            p50_ms: Self::percentile_of(filled, 0.50),
            p90_ms: Self::percentile_of(filled, 0.90),
            p95_ms: Self::percentile_of(filled, 0.95),
            p99_ms: Self::percentile_of(filled, 0.99),
            current_ms: w.last,
            samples: w.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> LatencyGovernor {
        LatencyGovernor::new(2048, RegimeThresholds::default())
    }

    fn feed(g: &LatencyGovernor, rtt_ms: f64, n: usize) {
        for _ in 0..n {
            g.record_rtt_ms(rtt_ms);
        }
    }

    #[test]
    fn starts_degraded() {
        let g = governor();
        assert_eq!(g.regime(), LatencyRegime::Degraded);
        assert!(!g.allow_entry("XAUUSD"));
        assert!(!g.allow_entry("XAGUSD"));
    }

    #[test]
    fn fast_after_confirmation() {
        let g = governor();
        // 10 samples to fill the minimum window, then 10 more FAST
        // classifications to clear the hysteresis.
        feed(&g, 2.0, 30);
        assert_eq!(g.regime(), LatencyRegime::Fast);
        assert!(g.allow_entry("XAUUSD"));
        assert!(g.allow_entry("XAGUSD"));
    }

    #[test]
    fn no_single_sample_flip() {
        let g = governor();
        feed(&g, 2.0, 30);
        assert_eq!(g.regime(), LatencyRegime::Fast);

        // One slow ACK must not flip the regime.
        g.record_rtt_ms(50.0);
        assert_eq!(g.regime(), LatencyRegime::Fast);
    }

    #[test]
    fn sustained_slowness_degrades() {
        let g = governor();
        feed(&g, 2.0, 30);
        assert_eq!(g.regime(), LatencyRegime::Fast);

        feed(&g, 50.0, 10);
        assert_eq!(g.regime(), LatencyRegime::Degraded);
        assert!(!g.allow_entry("XAGUSD"));
        // XAG still allows time exits when degraded; XAU does not.
        assert!(g.allow_time_exit("XAGUSD"));
        assert!(!g.allow_time_exit("XAUUSD"));
    }

    #[test]
    fn normal_blocks_xau_only() {
        let g = governor();
        feed(&g, 2.0, 30);
        // Current sample over the FAST ceiling (8ms) but within NORMAL
        // (14ms); tails stay tight, so raw classification is NORMAL.
        feed(&g, 9.0, 10);
        assert_eq!(g.regime(), LatencyRegime::Normal);
        assert!(!g.allow_entry("XAUUSD"));
        assert!(g.allow_entry("XAGUSD"));
        assert!(g.allow_entry("EURUSD"));
    }

    #[test]
    fn ack_rtt_measurement() {
        let g = governor();
        g.record_submit(7, 1_000_000);
        g.on_ack(7, 3_000_000); // 2ms RTT
        assert_eq!(g.current(), 2.0);

        // Unknown id ignored.
        g.on_ack(99, 5_000_000);
        assert_eq!(g.current(), 2.0);
    }

    #[test]
    fn percentiles_ordered() {
        let g = governor();
        for i in 1..=100 {
            g.record_rtt_ms(i as f64);
        }
        assert!(g.p50() <= g.p90());
        assert!(g.p90() <= g.p95());
        assert!(g.p95() <= g.p99());
        assert_eq!(g.current(), 100.0);
    }
}

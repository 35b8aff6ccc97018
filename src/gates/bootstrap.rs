//! Bootstrap readiness evaluator
//!
//! Information-based warm-up: readiness is measured from feed quality,
//! signal quality and safety arming, not from executed trades. A symbol can
//! complete bootstrap with zero fills if the market is ready. While not
//! complete, intents are observed (they feed the edge gate) but never
//! executed.

use serde::Serialize;
use tracing::info;

/// Bootstrap progression. Strictly forward; `Complete` is terminal until an
/// explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BootstrapState {
    Init,
    WaitData,
    WaitEdge,
    Complete,
}

impl BootstrapState {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapState::Init => "INIT",
            BootstrapState::WaitData => "WAIT_DATA",
            BootstrapState::WaitEdge => "WAIT_EDGE",
            BootstrapState::Complete => "COMPLETE",
        }
    }
}

/// Readiness thresholds. Conservative defaults.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Book must be continuously valid this long.
    pub min_book_valid_ms: u64,
    pub min_tick_count: u32,
    pub min_spread_samples: u32,

    pub min_intents: u32,
    /// Max direction flip-flop rate.
    pub max_churn_rate: f64,
    /// Min directional persistence.
    pub min_persistence: f64,
    pub min_mean_edge_bps: f64,

    pub require_kill_switch: bool,
    pub require_spread_guard: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_book_valid_ms: 30_000,
            min_tick_count: 100,
            min_spread_samples: 200,
            min_intents: 40,
            max_churn_rate: 0.25,
            min_persistence: 0.60,
            min_mean_edge_bps: 0.5,
            require_kill_switch: true,
            require_spread_guard: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSnapshot {
    pub state: BootstrapState,
    pub tick_count: u32,
    pub book_valid_ms: u64,
    pub spread_samples: u32,
    pub intent_count: u32,
    pub churn_rate: f64,
    pub persistence: f64,
    pub mean_edge_bps: f64,
    pub data_ready: bool,
    pub edge_ready: bool,
    pub safety_ready: bool,
}

/// Per-symbol three-gate bootstrap state machine.
pub struct BootstrapEvaluator {
    symbol: String,
    config: BootstrapConfig,
    state: BootstrapState,

    // Data readiness
    tick_count: u32,
    book_valid_start_ns: u64,
    book_valid_ms: u64,
    spread_samples: u32,

    // Edge quality (aggregates over observed shadow intents)
    intent_count: u32,
    direction_flips: u32,
    last_direction: i8,
    buy_intents: u32,
    sell_intents: u32,
    edge_sum: f64,

    // Safety arming
    kill_switch_armed: bool,
    spread_guard_active: bool,

    // Explicit status-log counter (owned state, not thread-local)
    eval_count: u64,
}

impl BootstrapEvaluator {
    pub fn new(symbol: &str, config: BootstrapConfig) -> Self {
        Self {
            symbol: symbol.to_string(),
            config,
            state: BootstrapState::Init,
            tick_count: 0,
            book_valid_start_ns: 0,
            book_valid_ms: 0,
            spread_samples: 0,
            intent_count: 0,
            direction_flips: 0,
            last_direction: 0,
            buy_intents: 0,
            sell_intents: 0,
            edge_sum: 0.0,
            kill_switch_armed: false,
            spread_guard_active: false,
            eval_count: 0,
        }
    }

    /// Feed observation; call on every tick.
    pub fn observe_tick(&mut self, spread_bps: f64, bid: f64, ask: f64, now_ns: u64) {
        self.tick_count = self.tick_count.saturating_add(1);

        let book_valid = spread_bps > 0.0 && bid > 0.0 && ask > 0.0 && bid < ask;
        if book_valid {
            if self.book_valid_start_ns == 0 {
                self.book_valid_start_ns = now_ns;
            }
            self.book_valid_ms = (now_ns - self.book_valid_start_ns) / 1_000_000;
        } else {
            // Validity window restarts on any broken book.
            self.book_valid_start_ns = 0;
            self.book_valid_ms = 0;
        }

        if spread_bps > 0.0 {
            self.spread_samples = self.spread_samples.saturating_add(1);
        }
    }

    /// Shadow-intent observation; call whenever the gates would have passed
    /// an intent. Counts signals, not executions.
    pub fn observe_intent(&mut self, direction: i8, edge_bps: f64) {
        if direction == 0 {
            return;
        }

        self.intent_count = self.intent_count.saturating_add(1);

        if self.last_direction != 0 && direction != self.last_direction {
            self.direction_flips += 1;
        }
        self.last_direction = direction;

        if direction > 0 {
            self.buy_intents += 1;
        } else {
            self.sell_intents += 1;
        }
        self.edge_sum += edge_bps;
    }

    /// Safety observation; call periodically from the control loop.
    pub fn observe_safety(&mut self, kill_switch_armed: bool, spread_guard_active: bool) {
        self.kill_switch_armed = kill_switch_armed;
        self.spread_guard_active = spread_guard_active;
    }

    /// Advance the state machine. Never regresses. Returns completion.
    pub fn evaluate(&mut self) -> bool {
        if self.state == BootstrapState::Complete {
            return true;
        }
        self.eval_count += 1;

        let data_ready = self.data_ready();
        let edge_ready = self.edge_ready();
        let safety_ready = self.safety_ready();

        if self.state == BootstrapState::Init {
            self.state = BootstrapState::WaitData;
        }

        if self.state == BootstrapState::WaitData && data_ready {
            self.state = BootstrapState::WaitEdge;
            info!(symbol = %self.symbol, "bootstrap DATA_READY, waiting on edge quality");
        }

        if self.state == BootstrapState::WaitEdge && edge_ready && safety_ready {
            self.state = BootstrapState::Complete;
            info!(
                symbol = %self.symbol,
                ticks = self.tick_count,
                intents = self.intent_count,
                churn = self.churn_rate(),
                persistence = self.persistence(),
                mean_edge_bps = self.mean_edge_bps(),
                "bootstrap COMPLETE, trading enabled"
            );
        }

        if self.state != BootstrapState::Complete && self.eval_count % 2000 == 1 {
            info!(
                symbol = %self.symbol,
                state = self.state.as_str(),
                book_ms = self.book_valid_ms,
                ticks = self.tick_count,
                spreads = self.spread_samples,
                intents = self.intent_count,
                "bootstrap progress"
            );
        }

        self.state == BootstrapState::Complete
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state == BootstrapState::Complete
    }

    #[inline]
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn churn_rate(&self) -> f64 {
        if self.intent_count < 2 {
            0.0
        } else {
            self.direction_flips as f64 / (self.intent_count - 1) as f64
        }
    }

    pub fn persistence(&self) -> f64 {
        let total = self.buy_intents + self.sell_intents;
        if total == 0 {
            0.5
        } else {
            self.buy_intents.max(self.sell_intents) as f64 / total as f64
        }
    }

    pub fn mean_edge_bps(&self) -> f64 {
        if self.intent_count == 0 {
            0.0
        } else {
            self.edge_sum / self.intent_count as f64
        }
    }

    pub fn data_ready(&self) -> bool {
        self.book_valid_ms >= self.config.min_book_valid_ms
            && self.tick_count >= self.config.min_tick_count
            && self.spread_samples >= self.config.min_spread_samples
    }

    pub fn edge_ready(&self) -> bool {
        if self.intent_count < self.config.min_intents {
            return false;
        }
        self.churn_rate() <= self.config.max_churn_rate
            && self.persistence() >= self.config.min_persistence
            && self.mean_edge_bps() >= self.config.min_mean_edge_bps
    }

    pub fn safety_ready(&self) -> bool {
        if self.config.require_kill_switch && !self.kill_switch_armed {
            return false;
        }
        if self.config.require_spread_guard && !self.spread_guard_active {
            return false;
        }
        true
    }

    /// Explicit reset; the only path that can leave `Complete`.
    pub fn reset(&mut self) {
        *self = Self::new(&self.symbol.clone(), self.config.clone());
    }

    pub fn snapshot(&self) -> BootstrapSnapshot {
        BootstrapSnapshot {
            state: self.state,
            tick_count: self.tick_count,
            book_valid_ms: self.book_valid_ms,
            spread_samples: self.spread_samples,
            intent_count: self.intent_count,
            churn_rate: self.churn_rate(),
            persistence: self.persistence(),
            mean_edge_bps: self.mean_edge_bps(),
            data_ready: self.data_ready(),
            edge_ready: self.edge_ready(),
            safety_ready: self.safety_ready(),
        }
    }
}

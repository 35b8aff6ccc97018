//! Capital policy
//!
//! Pre-trade gate lattice. Default is NO TRADE: an intent must pass every
//! gate, in order, and the first failure is the block reason. Tier-locked
//! symbols, money windows only, no overlapping index exposure, scale-up
//! only on a risk-free position past +0.5R.

use std::collections::HashSet;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

/// Symbol capital tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTier {
    /// Core earners, full capital.
    A,
    /// Conditional, reduced capital.
    B,
    /// Never trades.
    C,
}

impl SymbolTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolTier::A => "A",
            SymbolTier::B => "B",
            SymbolTier::C => "C",
        }
    }
}

/// Tradeable session windows (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionWindow {
    /// 07:00-09:00 UTC
    LondonOpen,
    /// 12:00-14:00 UTC overlap
    LondonNy,
    /// 13:30-15:30 UTC
    NyOpen,
    /// Blocked.
    Other,
}

impl SessionWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionWindow::LondonOpen => "LONDON_OPEN",
            SessionWindow::LondonNy => "LONDON_NY",
            SessionWindow::NyOpen => "NY_OPEN",
            SessionWindow::Other => "OTHER",
        }
    }

    /// Session risk multiplier; NY open carries the most follow-through.
    pub fn risk_multiplier(self) -> f64 {
        match self {
            SessionWindow::LondonOpen => 1.4,
            SessionWindow::LondonNy => 1.2,
            SessionWindow::NyOpen => 1.6,
            SessionWindow::Other => 0.0,
        }
    }

    /// Derive the window from a UTC minute-of-day.
    pub fn from_minute_of_day(minutes: u32) -> Self {
        // NY open overlaps London-NY; the overlap window is checked first
        // so 13:30-14:00 counts as LondonNy.
        if (7 * 60..9 * 60).contains(&minutes) {
            SessionWindow::LondonOpen
        } else if (12 * 60..14 * 60).contains(&minutes) {
            SessionWindow::LondonNy
        } else if (13 * 60 + 30..15 * 60 + 30).contains(&minutes) {
            SessionWindow::NyOpen
        } else {
            SessionWindow::Other
        }
    }

    pub fn from_utc(utc: DateTime<Utc>) -> Self {
        Self::from_minute_of_day(utc.hour() * 60 + utc.minute())
    }
}

/// Why an intent was blocked. Surfaced verbatim in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockReason {
    None,
    TierRestricted,
    SessionInvalid,
    SpreadWide,
    RegimeMismatch,
    EdgeTooWeak,
    ChopDetected,
    OverlappingExposure,
    DailyRiskLimit,
    MaxPositions,
    LatencyDegraded,
    Lockdown,
    DriftKill,
    NotBootstrapped,
    // Lattice-level reasons outside the policy gates proper.
    SymbolDisabled,
    VenueUnhealthy,
    StressBlocked,
    RiskRejected,
    CapitalExhausted,
    PositionCap,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::None => "NONE",
            BlockReason::TierRestricted => "TIER_RESTRICTED",
            BlockReason::SessionInvalid => "SESSION_INVALID",
            BlockReason::SpreadWide => "SPREAD_WIDE",
            BlockReason::RegimeMismatch => "REGIME_MISMATCH",
            BlockReason::EdgeTooWeak => "EDGE_TOO_WEAK",
            BlockReason::ChopDetected => "CHOP_DETECTED",
            BlockReason::OverlappingExposure => "OVERLAPPING_EXPOSURE",
            BlockReason::DailyRiskLimit => "DAILY_RISK_LIMIT",
            BlockReason::MaxPositions => "MAX_POSITIONS",
            BlockReason::LatencyDegraded => "LATENCY_DEGRADED",
            BlockReason::Lockdown => "LOCKDOWN",
            BlockReason::DriftKill => "DRIFT_KILL",
            BlockReason::NotBootstrapped => "NOT_BOOTSTRAPPED",
            BlockReason::SymbolDisabled => "SYMBOL_DISABLED",
            BlockReason::VenueUnhealthy => "VENUE_UNHEALTHY",
            BlockReason::StressBlocked => "STRESS_BLOCKED",
            BlockReason::RiskRejected => "RISK_REJECTED",
            BlockReason::CapitalExhausted => "CAPITAL_EXHAUSTED",
            BlockReason::PositionCap => "POSITION_CAP",
        }
    }
}

/// Open position summary fed into overlap and scale-up checks.
#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: String,
    /// +1 long, -1 short.
    pub direction: i32,
    /// Current R multiple (unrealized PnL / initial risk).
    pub open_r: f64,
    /// Stop at break-even or better.
    pub risk_free: bool,
}

/// Outcome of the policy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct CapitalDecision {
    pub allow_trade: bool,
    pub allow_scale_up: bool,
    pub risk_fraction: f64,
    pub block_reason: BlockReason,
}

impl CapitalDecision {
    fn blocked(reason: BlockReason) -> Self {
        Self {
            allow_trade: false,
            allow_scale_up: false,
            risk_fraction: 0.0,
            block_reason: reason,
        }
    }
}

/// Everything the policy needs to judge one intent.
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub symbol: &'a str,
    pub session: SessionWindow,
    /// 0-2+; 1.0 is the minimum acceptable.
    pub edge_strength: f64,
    pub spread: f64,
    pub spread_limit: f64,
    pub regime_allowed: bool,
    pub chop_detected: bool,
    pub open_positions: &'a [OpenPosition],
    pub daily_r_used: f64,
    /// +1 long, -1 short.
    pub direction: i32,
}

/// Equity-stepped base risk ladder. Conservative compounding.
#[derive(Debug, Clone)]
pub struct CapitalLadder {
    steps: Vec<(f64, f64)>,
}

impl Default for CapitalLadder {
    fn default() -> Self {
        Self {
            steps: vec![
                (0.0, 0.0025),
                (50_000.0, 0.0030),
                (100_000.0, 0.0035),
                (200_000.0, 0.0040),
                (500_000.0, 0.0050),
            ],
        }
    }
}

impl CapitalLadder {
    pub fn base_risk_for_equity(&self, equity: f64) -> f64 {
        let mut risk = self.steps[0].1;
        for &(equity_min, base_risk) in &self.steps {
            if equity >= equity_min {
                risk = base_risk;
            } else {
                break;
            }
        }
        risk
    }
}

const MAX_DAILY_R: f64 = 2.0;
const MAX_OPEN_POSITIONS: usize = 2;
const MIN_EDGE_STRENGTH: f64 = 1.0;
const SCALE_UP_MIN_R: f64 = 0.5;
const SCALE_UP_FACTOR: f64 = 1.5;

/// Tier-locked, session-windowed capital policy.
pub struct CapitalPolicy {
    tier_a: HashSet<String>,
    tier_b: HashSet<String>,
    ladder: CapitalLadder,
}

impl CapitalPolicy {
    pub fn new() -> Self {
        let tier_a = [
            "NAS100", "NAS100m", "SPX500", "SPX500m", "US30", "US30m", "XAUUSD", "XAUUSDm",
        ];
        let tier_b = [
            "GER40", "GER40m", "UK100", "UK100m", "EURUSD", "EURUSDm", "GBPUSD", "GBPUSDm",
            "USDJPY", "USDJPYm", "XAGUSD", "XAGUSDm",
        ];
        Self {
            tier_a: tier_a.iter().map(|s| s.to_string()).collect(),
            tier_b: tier_b.iter().map(|s| s.to_string()).collect(),
            ladder: CapitalLadder::default(),
        }
    }

    pub fn symbol_tier(&self, symbol: &str) -> SymbolTier {
        if self.tier_a.contains(symbol) {
            SymbolTier::A
        } else if self.tier_b.contains(symbol) {
            SymbolTier::B
        } else {
            SymbolTier::C
        }
    }

    pub fn ladder(&self) -> &CapitalLadder {
        &self.ladder
    }

    /// Evaluate the nine gates in fixed order; first failure wins.
    pub fn evaluate(&self, input: &PolicyInput<'_>) -> CapitalDecision {
        // Gate 1: tier lock.
        let tier = self.symbol_tier(input.symbol);
        if tier == SymbolTier::C {
            return CapitalDecision::blocked(BlockReason::TierRestricted);
        }

        // Gate 2: money windows only.
        if input.session == SessionWindow::Other {
            return CapitalDecision::blocked(BlockReason::SessionInvalid);
        }

        // Gate 3: spread discipline.
        if input.spread > input.spread_limit {
            return CapitalDecision::blocked(BlockReason::SpreadWide);
        }

        // Gate 4: regime mismatch.
        if !input.regime_allowed {
            return CapitalDecision::blocked(BlockReason::RegimeMismatch);
        }

        // Gate 5: chop detection.
        if input.chop_detected {
            return CapitalDecision::blocked(BlockReason::ChopDetected);
        }

        // Gate 6: edge strength.
        if input.edge_strength < MIN_EDGE_STRENGTH {
            return CapitalDecision::blocked(BlockReason::EdgeTooWeak);
        }

        // Gate 7: overlapping index exposure.
        if self.overlapping_index_exposure(input.symbol, input.direction, input.open_positions) {
            return CapitalDecision::blocked(BlockReason::OverlappingExposure);
        }

        // Gate 8: daily risk cap.
        if input.daily_r_used >= MAX_DAILY_R {
            return CapitalDecision::blocked(BlockReason::DailyRiskLimit);
        }

        // Gate 9: concurrent positions.
        if input.open_positions.len() >= MAX_OPEN_POSITIONS {
            return CapitalDecision::blocked(BlockReason::MaxPositions);
        }

        let mut risk_fraction = match tier {
            SymbolTier::A => 0.005,
            SymbolTier::B => 0.0025,
            SymbolTier::C => unreachable!("tier C blocked at gate 1"),
        };
        risk_fraction *= input.session.risk_multiplier();

        // Scale-up: one add only, after +0.5R, stop must be risk-free.
        let mut allow_scale_up = false;
        for pos in input.open_positions {
            if pos.symbol == input.symbol && pos.open_r >= SCALE_UP_MIN_R && pos.risk_free {
                allow_scale_up = true;
                risk_fraction *= SCALE_UP_FACTOR;
                break;
            }
        }

        CapitalDecision {
            allow_trade: true,
            allow_scale_up,
            risk_fraction,
            block_reason: BlockReason::None,
        }
    }

    fn is_index(symbol: &str) -> bool {
        ["NAS100", "SPX500", "US30", "GER40", "UK100"]
            .iter()
            .any(|idx| symbol.contains(idx))
    }

    fn overlapping_index_exposure(
        &self,
        symbol: &str,
        direction: i32,
        open_positions: &[OpenPosition],
    ) -> bool {
        if !Self::is_index(symbol) {
            return false;
        }
        open_positions.iter().any(|pos| {
            Self::is_index(&pos.symbol) && pos.direction == direction && !pos.risk_free
        })
    }
}

impl Default for CapitalPolicy {
    fn default() -> Self {
        Self::new()
    }
}

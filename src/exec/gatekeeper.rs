//! Gate lattice traversal
//!
//! Every intent crosses the full lattice here, in fixed order, before it
//! may touch the router: bootstrap, drift kill, symbol health, daily loss,
//! microstructure stress, venue arbitration, latency policy, runtime risk
//! and capital policy. The first failing gate names the block reason; the
//! surviving multipliers compose into the final size multiplier.
//!
//! Evaluation is pure. The subsequent `reserve` step performs the atomic
//! check-and-reserve against the position gate and the capital allocator,
//! rolling back cleanly when the second reservation fails.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;

use crate::capital::{CapitalAllocator, OrderIntent};
use crate::gates::{DailyLossGuard, DeltaGate, SymbolHealthTracker};
use crate::latency::LatencyGovernor;
use crate::risk::{
    BlockReason, CapitalPolicy, DriftDetector, OpenPosition, PolicyInput, PositionGate,
    RiskGovernor, Session, SessionWindow,
};
use crate::venue::ExecutionArbiter;

/// Exponent for the loss-guard drawdown throttle.
const DD_THROTTLE_EXP: f64 = 2.0;

/// Market and account state for one gate traversal.
#[derive(Debug, Clone)]
pub struct GateContext<'a> {
    pub session: SessionWindow,
    pub risk_session: Session,
    pub edge_strength: f64,
    pub spread: f64,
    pub spread_limit: f64,
    pub regime_allowed: bool,
    pub chop_detected: bool,
    pub open_positions: &'a [OpenPosition],
    pub daily_r_used: f64,
    pub bootstrapped: bool,
    pub now_ns: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub size_mult: f64,
    pub reason: BlockReason,
    pub risk_fraction: f64,
    pub allow_scale_up: bool,
}

impl GateDecision {
    fn blocked(reason: BlockReason) -> Self {
        counter!("chimera.gate.blocked", 1, "reason" => reason.as_str());
        Self {
            allowed: false,
            size_mult: 0.0,
            reason,
            risk_fraction: 0.0,
            allow_scale_up: false,
        }
    }
}

/// Shared-governor composition. Constructed once at startup, traversed by
/// every per-symbol consumer.
pub struct Gatekeeper {
    pub symbol_health: Arc<SymbolHealthTracker>,
    pub drift: Arc<DriftDetector>,
    pub loss_guard: Arc<DailyLossGuard>,
    pub delta: Arc<DeltaGate>,
    pub arbiter: Arc<ExecutionArbiter>,
    pub latency: Arc<LatencyGovernor>,
    pub governor: Arc<RiskGovernor>,
    pub policy: Arc<CapitalPolicy>,
    pub position_gate: Arc<PositionGate>,
    pub allocator: Arc<CapitalAllocator>,
}

impl Gatekeeper {
    /// Traverse the lattice. Pure: no reservations, no side effects beyond
    /// block-reason counters.
    pub fn evaluate(&self, order: &OrderIntent, ctx: &GateContext<'_>) -> GateDecision {
        let symbol = order.symbol.as_str();

        if !ctx.bootstrapped {
            return GateDecision::blocked(BlockReason::NotBootstrapped);
        }
        if self.drift.killed() {
            return GateDecision::blocked(BlockReason::DriftKill);
        }
        if !self.symbol_health.enabled(symbol) {
            return GateDecision::blocked(BlockReason::SymbolDisabled);
        }
        if !self.loss_guard.allow() {
            return GateDecision::blocked(BlockReason::DailyRiskLimit);
        }
        if self.delta.is_blocked() {
            return GateDecision::blocked(BlockReason::StressBlocked);
        }

        let arbiter = self.arbiter.decide(ctx.now_ns);
        if !arbiter.allow {
            return GateDecision::blocked(BlockReason::VenueUnhealthy);
        }

        if !self.latency.allow_entry(symbol) {
            return GateDecision::blocked(BlockReason::LatencyDegraded);
        }

        let risk = self.governor.evaluate_at(ctx.risk_session);
        if !risk.approved {
            return GateDecision::blocked(BlockReason::RiskRejected);
        }

        let policy = self.policy.evaluate(&PolicyInput {
            symbol,
            session: ctx.session,
            edge_strength: ctx.edge_strength,
            spread: ctx.spread,
            spread_limit: ctx.spread_limit,
            regime_allowed: ctx.regime_allowed,
            chop_detected: ctx.chop_detected,
            open_positions: ctx.open_positions,
            daily_r_used: ctx.daily_r_used,
            direction: if order.side.sign() > 0.0 { 1 } else { -1 },
        });
        if !policy.allow_trade {
            return GateDecision::blocked(policy.block_reason);
        }

        let size_mult = arbiter.size_mult
            * self.delta.size_multiplier()
            * risk.size_mult
            * self.loss_guard.throttle_factor(DD_THROTTLE_EXP);

        // Lockdown passes intents at minimum size; surface it in telemetry
        // without blocking.
        let reason = if self.governor.lockdown() {
            BlockReason::Lockdown
        } else {
            BlockReason::None
        };

        GateDecision {
            allowed: size_mult > 0.0,
            size_mult,
            reason,
            risk_fraction: policy.risk_fraction,
            allow_scale_up: policy.allow_scale_up,
        }
    }

    /// Atomic check-and-reserve against both the position gate (signed
    /// quantity) and the allocator (notional). Either both succeed or
    /// neither holds anything.
    pub fn reserve(&self, order: &OrderIntent) -> Result<(), BlockReason> {
        let symbol = order.symbol.as_str();
        let signed_qty = order.side.sign() * order.qty;

        if !self.position_gate.try_reserve(symbol, signed_qty) {
            counter!("chimera.gate.blocked", 1, "reason" => BlockReason::PositionCap.as_str());
            return Err(BlockReason::PositionCap);
        }
        if !self.allocator.reserve(order) {
            self.position_gate.unreserve(symbol, signed_qty);
            counter!("chimera.gate.blocked", 1, "reason" => BlockReason::CapitalExhausted.as_str());
            return Err(BlockReason::CapitalExhausted);
        }
        Ok(())
    }

    /// Back out a full reservation (submit failed or order rejected).
    pub fn unreserve(&self, order: &OrderIntent) {
        self.position_gate
            .unreserve(order.symbol.as_str(), order.side.sign() * order.qty);
        self.allocator.release(order);
    }
}

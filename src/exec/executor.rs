//! Per-symbol execution state machine
//!
//! One executor per symbol, driven single-threaded by that symbol's
//! consumer loop. Entries flow through the gate lattice; open legs are
//! managed tick by tick: excursion tracking, trailing stop, hard stop,
//! latency-scaled take profit and impulse-decay forced exits. Exits feed
//! realized PnL back into the loss guard, the risk governor, symbol health
//! and the Bayesian edge posterior.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capital::{Engine, OrderIntent};
use crate::exec::gatekeeper::{GateContext, Gatekeeper};
use crate::exec::router::{ClientIdAllocator, FillEvent, OrderKind, OrderRouter, SubmitOutcome};
use crate::feed::QuoteUpdate;
use crate::gates::{BootstrapConfig, BootstrapEvaluator};
use crate::intent::{Intent, Side, SymbolCode};
use crate::risk::{
    BayesianEdge, ImpulseProfile, ImpulseSizer, ImpulseTier, OpenPosition, Session, SessionWindow,
};
use crate::telemetry::{TelemetryRecord, TelemetryRing};

const NANOS_PER_MS: u64 = 1_000_000;

/// Impulse-decay exit thresholds: force out below 0.30 of entry impulse,
/// warn below 0.48.
const DECAY_EXIT_RATIO: f64 = 0.30;
const DECAY_WARN_RATIO: f64 = 0.48;

/// Bayesian sizing stays inert until the posterior has this many outcomes.
const MIN_EDGE_OBSERVATIONS: f64 = 20.0;

/// Executor lifecycle per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecState {
    Idle,
    Entering,
    Holding,
    Exiting,
    Cooldown,
}

/// Why a leg was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    Stop,
    TakeProfit,
    ImpulseDecay,
    Flatten,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Stop => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::ImpulseDecay => "DECAY",
            ExitReason::Flatten => "FLATTEN",
        }
    }
}

/// Static per-symbol tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub symbol: String,
    pub engine: Engine,
    pub base_qty: f64,
    /// Take-profit distance in price points, before latency scaling.
    pub initial_tp: f64,
    /// Hard stop distance in price points.
    pub hard_stop: f64,
    /// Favorable move that arms the trailing stop.
    pub trail_trigger: f64,
    pub trail_distance: f64,
    pub impulse: ImpulseProfile,
    pub soft_cooldown_ms: u64,
    pub hard_cooldown_ms: u64,
    /// Impulse decay time constant.
    pub decay_tau_ms: u64,
    pub spread_limit: f64,
    pub max_trades_per_hour: u32,
    pub bootstrap: BootstrapConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            engine: Engine::Hft,
            base_qty: 1.0,
            initial_tp: 2.0,
            hard_stop: 1.5,
            trail_trigger: 1.0,
            trail_distance: 0.8,
            impulse: ImpulseProfile::default(),
            soft_cooldown_ms: 800,
            hard_cooldown_ms: 400,
            decay_tau_ms: 120,
            spread_limit: 0.5,
            max_trades_per_hour: 60,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

/// Session and regime context pushed in by the scheduler; the executor
/// never reads wall clocks itself.
#[derive(Debug, Clone, Copy)]
pub struct MarketCtx {
    pub session: SessionWindow,
    pub risk_session: Session,
    pub regime_allowed: bool,
    pub chop_detected: bool,
}

impl Default for MarketCtx {
    fn default() -> Self {
        Self {
            session: SessionWindow::LondonOpen,
            risk_session: Session::London,
            regime_allowed: true,
            chop_detected: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Leg {
    client_id: u64,
    side: Side,
    qty: f64,
    entry_price: f64,
    entry_ts_ns: u64,
    entry_impulse: f64,
    entry_notional: f64,
    stop: f64,
    take_profit: f64,
    mfe: f64,
    mae: f64,
    trailing_armed: bool,
    decay_warned: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    order: OrderIntent,
    tp_scale: f64,
    entry_impulse: f64,
    filled_qty: f64,
    scale_up: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingExit {
    order: OrderIntent,
    leg_client_id: u64,
    reason: ExitReason,
    filled_qty: f64,
}

/// Per-symbol state machine: entry, pyramid, stop, take profit, exit.
pub struct SymbolExecutor {
    config: ExecutorConfig,
    symbol_code: SymbolCode,
    state: ExecState,
    legs: Vec<Leg>,
    pending_entry: Option<PendingEntry>,
    pending_exit: Option<PendingExit>,

    cooldown_until_ns: u64,
    pyramided: bool,
    consecutive_losses: u32,
    trades_this_hour: u32,
    hour_anchor: u64,
    daily_r_used: f64,
    realized_pnl: f64,

    last_bid: f64,
    last_ask: f64,
    prev_mid: f64,
    prev_ts_ns: u64,
    velocity: f64,

    market_ctx: MarketCtx,
    bootstrap: BootstrapEvaluator,
    edge: BayesianEdge,

    gatekeeper: Arc<Gatekeeper>,
    router: Arc<dyn OrderRouter>,
    client_ids: Arc<ClientIdAllocator>,
    telemetry: Option<Arc<TelemetryRing>>,
}

impl SymbolExecutor {
    pub fn new(
        config: ExecutorConfig,
        gatekeeper: Arc<Gatekeeper>,
        router: Arc<dyn OrderRouter>,
        client_ids: Arc<ClientIdAllocator>,
        telemetry: Option<Arc<TelemetryRing>>,
    ) -> Self {
        let bootstrap = BootstrapEvaluator::new(&config.symbol, config.bootstrap.clone());
        let symbol_code = SymbolCode::new(&config.symbol);
        Self {
            config,
            symbol_code,
            state: ExecState::Idle,
            legs: Vec::new(),
            pending_entry: None,
            pending_exit: None,
            cooldown_until_ns: 0,
            pyramided: false,
            consecutive_losses: 0,
            trades_this_hour: 0,
            hour_anchor: 0,
            daily_r_used: 0.0,
            realized_pnl: 0.0,
            last_bid: 0.0,
            last_ask: 0.0,
            prev_mid: 0.0,
            prev_ts_ns: 0,
            velocity: 0.0,
            market_ctx: MarketCtx::default(),
            bootstrap,
            edge: BayesianEdge::new(),
            gatekeeper,
            router,
            client_ids,
            telemetry,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn open_leg_count(&self) -> usize {
        self.legs.len()
    }

    pub fn bootstrap(&self) -> &BootstrapEvaluator {
        &self.bootstrap
    }

    /// Scheduler pushes session/regime context periodically.
    pub fn set_market_ctx(&mut self, ctx: MarketCtx) {
        self.market_ctx = ctx;
    }

    /// A trade intent from the ring. The quote stream drives exits; intents
    /// only propose entries, and every gate still applies.
    pub fn on_intent(&mut self, intent: &Intent) {
        if intent.symbol != self.symbol_code {
            return;
        }
        let velocity = self.velocity;
        self.try_enter(intent.side, velocity, intent.ts_ns);
    }

    /// Market tick. Updates velocity and the quote cache, advances the
    /// bootstrap evaluator, manages open legs and evaluates entries.
    pub fn on_quote(&mut self, q: &QuoteUpdate, now_ns: u64) {
        if q.symbol != self.symbol_code {
            return;
        }

        self.last_bid = q.bid;
        self.last_ask = q.ask;
        let mid = q.mid();
        if self.prev_ts_ns > 0 && mid > 0.0 {
            let dt_ns = now_ns.saturating_sub(self.prev_ts_ns).max(1);
            // Price points per 100ms.
            self.velocity = (mid - self.prev_mid) * (100.0 * NANOS_PER_MS as f64) / dt_ns as f64;
        }
        self.prev_mid = mid;
        self.prev_ts_ns = now_ns;

        self.bootstrap.observe_tick(q.spread_bps(), q.bid, q.ask, now_ns);
        // Safety gates are wired at construction: the drift kill switch is
        // armed whenever the gatekeeper holds it, and the spread guard is
        // active whenever a limit is configured.
        self.bootstrap
            .observe_safety(true, self.config.spread_limit > 0.0);
        self.bootstrap.evaluate();

        self.roll_hour(now_ns);

        match self.state {
            ExecState::Cooldown => {
                if now_ns >= self.cooldown_until_ns {
                    self.state = ExecState::Idle;
                }
            }
            ExecState::Holding => {
                self.manage_legs(now_ns);
                // Pyramid path: at most one add, policy-gated.
                if self.state == ExecState::Holding && !self.pyramided {
                    let velocity = self.velocity;
                    let side = if velocity >= 0.0 { Side::Buy } else { Side::Sell };
                    self.try_enter(side, velocity, now_ns);
                }
            }
            ExecState::Idle => {
                let velocity = self.velocity;
                let side = if velocity >= 0.0 { Side::Buy } else { Side::Sell };
                self.try_enter(side, velocity, now_ns);
            }
            ExecState::Entering | ExecState::Exiting => {}
        }
    }

    /// Order lifecycle events for this symbol, delivered by the consumer
    /// loop after the venue callback queued them.
    pub fn on_order_event(&mut self, event: &FillEvent) {
        match *event {
            FillEvent::Ack { .. } => {}
            FillEvent::Fill {
                client_id,
                qty,
                price,
                ts_ns,
                ..
            } => self.on_fill(client_id, qty, price, ts_ns),
            FillEvent::Reject { client_id, ts_ns } => self.on_reject(client_id, ts_ns),
        }
    }

    fn roll_hour(&mut self, now_ns: u64) {
        let hour = now_ns / (3_600 * 1_000_000_000);
        if hour != self.hour_anchor {
            self.hour_anchor = hour;
            self.trades_this_hour = 0;
        }
    }

    // --- entry path ---

    fn try_enter(&mut self, side: Side, velocity: f64, now_ns: u64) {
        if self.state != ExecState::Idle && self.state != ExecState::Holding {
            return;
        }
        if now_ns < self.cooldown_until_ns {
            return;
        }
        if self.trades_this_hour >= self.config.max_trades_per_hour {
            return;
        }

        let tier = ImpulseSizer::classify(&self.config.impulse, velocity);
        if tier == ImpulseTier::None {
            return;
        }

        let direction: i8 = if side == Side::Buy { 1 } else { -1 };
        // Shadow signal: observed regardless of execution, it feeds the
        // bootstrap edge gate.
        self.bootstrap.observe_intent(direction, velocity.abs() * 10.0);

        let price = match side {
            Side::Buy => self.last_ask,
            Side::Sell => self.last_bid,
        };
        if price <= 0.0 {
            return;
        }

        let scale_up = self.state == ExecState::Holding;

        let regime = self.gatekeeper.latency.regime();
        let sizing = ImpulseSizer::compute(&self.config.impulse, regime, velocity);
        if sizing.multiplier <= 0.0 {
            return;
        }

        let provisional = OrderIntent {
            client_id: self.client_ids.next_id(),
            engine: self.config.engine,
            symbol: self.symbol_code,
            side,
            qty: self.config.base_qty,
            price,
        };

        let open_positions = self.open_positions();
        let ctx = GateContext {
            session: self.market_ctx.session,
            risk_session: self.market_ctx.risk_session,
            edge_strength: self.edge.edge_probability() * 2.0,
            spread: self.last_ask - self.last_bid,
            spread_limit: self.config.spread_limit,
            regime_allowed: self.market_ctx.regime_allowed,
            chop_detected: self.market_ctx.chop_detected,
            open_positions: &open_positions,
            daily_r_used: self.daily_r_used,
            bootstrapped: self.bootstrap.is_complete(),
            now_ns,
        };

        let decision = self.gatekeeper.evaluate(&provisional, &ctx);
        if !decision.allowed {
            self.push_telemetry(TelemetryRecord::Blocked {
                symbol: self.symbol_code,
                reason: decision.reason,
                ts_ns: now_ns,
            });
            return;
        }
        if scale_up && (!decision.allow_scale_up || self.pyramided) {
            return;
        }

        let mut qty = self.config.base_qty * sizing.multiplier * decision.size_mult;
        // Bayesian edge modulates only once the posterior has data.
        if self.edge.observations() >= MIN_EDGE_OBSERVATIONS {
            qty = self
                .edge
                .kelly_size(qty, self.gatekeeper.loss_guard.drawdown_used());
        }
        // Hard clamp against runaway composition.
        qty = qty.min(self.config.base_qty * 1.2);
        if qty <= 0.0 {
            return;
        }

        let order = OrderIntent {
            qty,
            ..provisional
        };

        if self.gatekeeper.reserve(&order).is_err() {
            return;
        }

        if self.router.submit(&order, OrderKind::Market) != SubmitOutcome::Accepted {
            // Transport refused locally; back out and stay quiet.
            self.gatekeeper.unreserve(&order);
            return;
        }

        self.gatekeeper.latency.record_submit(order.client_id, now_ns);
        self.pending_entry = Some(PendingEntry {
            order,
            tp_scale: sizing.tp_scale,
            entry_impulse: velocity.abs(),
            filled_qty: 0.0,
            scale_up,
        });
        self.state = ExecState::Entering;
        self.trades_this_hour += 1;

        info!(
            symbol = %self.symbol_code,
            client_id = order.client_id,
            side = side.as_str(),
            qty,
            price,
            tier = sizing.tier.as_str(),
            size_mult = decision.size_mult,
            "entry submitted"
        );
    }

    // --- fills ---

    fn on_fill(&mut self, client_id: u64, qty: f64, price: f64, ts_ns: u64) {
        if let Some(mut pending) = self.pending_entry.take() {
            if pending.order.client_id == client_id {
                self.apply_entry_fill(&mut pending, qty, price, ts_ns);
                return;
            }
            self.pending_entry = Some(pending);
        }
        if let Some(mut pending) = self.pending_exit.take() {
            if pending.order.client_id == client_id {
                pending.filled_qty += qty;
                if pending.filled_qty + 1e-9 >= pending.order.qty {
                    self.apply_exit_fill(&pending, price, ts_ns);
                } else {
                    // Await the remainder of the exit.
                    self.pending_exit = Some(pending);
                }
                return;
            }
            self.pending_exit = Some(pending);
        }
        debug!(client_id, "fill for unknown order (already settled?)");
    }

    fn apply_entry_fill(&mut self, pending: &mut PendingEntry, qty: f64, price: f64, ts_ns: u64) {
        pending.filled_qty += qty;

        if let Some(pos) = self
            .legs
            .iter()
            .position(|l| l.client_id == pending.order.client_id)
        {
            // Later partial: extend quantity, re-weight the entry.
            let leg = &mut self.legs[pos];
            let total = leg.qty + qty;
            leg.entry_price = (leg.entry_price * leg.qty + price * qty) / total;
            leg.qty = total;
            leg.entry_notional += qty * price;
        } else {
            let is_long = pending.order.side == Side::Buy;
            let tp = self.config.initial_tp * pending.tp_scale;
            let leg = Leg {
                client_id: pending.order.client_id,
                side: pending.order.side,
                qty,
                entry_price: price,
                entry_ts_ns: ts_ns,
                entry_impulse: pending.entry_impulse,
                entry_notional: qty * price,
                stop: if is_long {
                    price - self.config.hard_stop
                } else {
                    price + self.config.hard_stop
                },
                take_profit: if is_long { price + tp } else { price - tp },
                mfe: 0.0,
                mae: 0.0,
                trailing_armed: false,
                decay_warned: false,
            };
            info!(
                symbol = %self.symbol_code,
                client_id = leg.client_id,
                qty,
                price,
                stop = leg.stop,
                tp = leg.take_profit,
                "entry filled"
            );
            self.legs.push(leg);
            if pending.scale_up {
                self.pyramided = true;
            }
        }

        if pending.filled_qty + 1e-9 >= pending.order.qty {
            self.gatekeeper.allocator.finalize(pending.order.client_id);
            self.state = ExecState::Holding;
        } else {
            // Await the remainder.
            self.pending_entry = Some(*pending);
            self.state = ExecState::Entering;
        }
    }

    fn apply_exit_fill(&mut self, pending: &PendingExit, price: f64, ts_ns: u64) {
        let Some(idx) = self
            .legs
            .iter()
            .position(|l| l.client_id == pending.leg_client_id)
        else {
            return;
        };
        let leg = self.legs.remove(idx);
        let is_long = leg.side == Side::Buy;
        let pnl = if is_long {
            (price - leg.entry_price) * leg.qty
        } else {
            (leg.entry_price - price) * leg.qty
        };
        self.settle_exit(&leg, pnl, price, pending.reason, ts_ns);
        self.gatekeeper.allocator.finalize(pending.order.client_id);
    }

    fn settle_exit(&mut self, leg: &Leg, pnl: f64, exit_price: f64, reason: ExitReason, ts_ns: u64) {
        self.realized_pnl += pnl;
        let win = pnl > 0.0;

        self.gatekeeper.loss_guard.on_fill(pnl, ts_ns);
        self.gatekeeper.governor.record_fill(pnl);
        self.gatekeeper
            .symbol_health
            .record_trade(self.symbol_code.as_str(), win, pnl);
        self.edge.record_trade(win, 1.0);

        // The closed leg's notional leaves the committed exposure, and the
        // directional reservation unwinds.
        self.gatekeeper.allocator.release_exposure(
            self.config.engine,
            self.symbol_code.as_str(),
            leg.entry_notional,
        );
        self.gatekeeper
            .position_gate
            .reserve(self.symbol_code.as_str(), -leg.side.sign() * leg.qty);
        self.gatekeeper.allocator.finalize(leg.client_id);

        // R budget: losses consume risk in units of the hard stop.
        if pnl < 0.0 {
            let r_unit = self.config.hard_stop * leg.qty;
            if r_unit > 0.0 {
                self.daily_r_used += (-pnl / r_unit).min(1.5);
            }
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        // Soft cooldown after any exit; hard tier stacks on stop-outs and
        // loss streaks.
        let mut cooldown_ms = self.config.soft_cooldown_ms;
        if reason == ExitReason::Stop || self.consecutive_losses >= 2 {
            cooldown_ms += self.config.hard_cooldown_ms;
        }
        self.cooldown_until_ns = ts_ns + cooldown_ms * NANOS_PER_MS;

        info!(
            symbol = %self.symbol_code,
            client_id = leg.client_id,
            pnl,
            exit_price,
            reason = reason.as_str(),
            "leg closed"
        );
        self.push_telemetry(TelemetryRecord::Exit {
            symbol: self.symbol_code,
            pnl,
            reason: reason.as_str(),
            ts_ns,
        });

        if self.legs.is_empty() {
            self.pyramided = false;
            self.state = ExecState::Cooldown;
        } else {
            self.state = ExecState::Holding;
        }
    }

    fn on_reject(&mut self, client_id: u64, _ts_ns: u64) {
        if let Some(pending) = self.pending_entry.take() {
            if pending.order.client_id == client_id {
                warn!(client_id, symbol = %self.symbol_code, "entry rejected");
                // Fanout released the allocator side; unwind the position
                // gate reservation here.
                self.gatekeeper.position_gate.unreserve(
                    self.symbol_code.as_str(),
                    pending.order.side.sign() * pending.order.qty,
                );
                self.state = if self.legs.is_empty() {
                    ExecState::Idle
                } else {
                    ExecState::Holding
                };
                return;
            }
            self.pending_entry = Some(pending);
        }
        if let Some(pending) = self.pending_exit.take() {
            if pending.order.client_id == client_id {
                // Exit rejected: keep holding, the next tick retries.
                warn!(client_id, symbol = %self.symbol_code, "exit rejected, retrying");
                self.state = ExecState::Holding;
                return;
            }
            self.pending_exit = Some(pending);
        }
    }

    // --- holding management ---

    fn manage_legs(&mut self, now_ns: u64) {
        let bid = self.last_bid;
        let ask = self.last_ask;
        if bid <= 0.0 || ask <= 0.0 {
            return;
        }

        let mut exit_request: Option<(u64, ExitReason)> = None;

        for leg in &mut self.legs {
            let is_long = leg.side == Side::Buy;
            let price = if is_long { bid } else { ask };
            let excursion = if is_long {
                price - leg.entry_price
            } else {
                leg.entry_price - price
            };

            leg.mfe = leg.mfe.max(excursion);
            leg.mae = leg.mae.max(-excursion);

            // Trailing stop arms after enough favorable travel, then only
            // ever advances.
            if !leg.trailing_armed && excursion >= self.config.trail_trigger {
                leg.trailing_armed = true;
            }
            if leg.trailing_armed {
                let candidate = if is_long {
                    price - self.config.trail_distance
                } else {
                    price + self.config.trail_distance
                };
                leg.stop = if is_long {
                    leg.stop.max(candidate)
                } else {
                    leg.stop.min(candidate)
                };
            }

            let stop_hit = if is_long {
                bid <= leg.stop
            } else {
                ask >= leg.stop
            };
            if stop_hit {
                exit_request = Some((leg.client_id, ExitReason::Stop));
                break;
            }

            let tp_hit = if is_long {
                bid >= leg.take_profit
            } else {
                ask <= leg.take_profit
            };
            if tp_hit {
                exit_request = Some((leg.client_id, ExitReason::TakeProfit));
                break;
            }

            // Impulse decay: the move that justified the entry has a short
            // half-life. Time-based, so the latency exit policy applies.
            if leg.entry_impulse > 0.0 {
                let age_ms = now_ns.saturating_sub(leg.entry_ts_ns) / NANOS_PER_MS;
                let ratio = (-(age_ms as f64) / self.config.decay_tau_ms as f64).exp();
                if ratio < DECAY_WARN_RATIO && !leg.decay_warned {
                    leg.decay_warned = true;
                    debug!(client_id = leg.client_id, ratio, "impulse decaying toward forced exit");
                }
                if ratio < DECAY_EXIT_RATIO {
                    exit_request = Some((leg.client_id, ExitReason::ImpulseDecay));
                    break;
                }
            }
        }

        if let Some((client_id, reason)) = exit_request {
            if reason == ExitReason::ImpulseDecay
                && !self
                    .gatekeeper
                    .latency
                    .allow_time_exit(self.symbol_code.as_str())
            {
                return;
            }
            self.submit_exit(client_id, reason, now_ns);
        }
    }

    fn submit_exit(&mut self, leg_client_id: u64, reason: ExitReason, now_ns: u64) {
        let Some(leg) = self.legs.iter().find(|l| l.client_id == leg_client_id) else {
            return;
        };
        let exit_side = match leg.side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };
        let price = match exit_side {
            Side::Buy => self.last_ask,
            Side::Sell => self.last_bid,
        };

        let order = OrderIntent {
            client_id: self.client_ids.next_id(),
            engine: self.config.engine,
            symbol: self.symbol_code,
            side: exit_side,
            qty: leg.qty,
            price,
        };

        if self.router.submit(&order, OrderKind::Market) != SubmitOutcome::Accepted {
            // Keep holding; the next tick will retry the exit.
            return;
        }
        self.gatekeeper.latency.record_submit(order.client_id, now_ns);
        self.pending_exit = Some(PendingExit {
            order,
            leg_client_id,
            reason,
            filled_qty: 0.0,
        });
        self.state = ExecState::Exiting;
    }

    /// Close every open leg at market and settle locally. Watchdog and
    /// shutdown flatten path; does not wait for venue confirmations.
    pub fn flatten(&mut self, now_ns: u64) {
        self.router.cancel_all(self.symbol_code.as_str());
        self.pending_exit = None;
        let legs = std::mem::take(&mut self.legs);
        for leg in legs {
            let exit_side = match leg.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            };
            let mut price = if leg.side == Side::Buy {
                self.last_bid
            } else {
                self.last_ask
            };
            if price <= 0.0 {
                // No market yet; scratch the leg at entry.
                price = leg.entry_price;
            }
            let order = OrderIntent {
                client_id: self.client_ids.next_id(),
                engine: self.config.engine,
                symbol: self.symbol_code,
                side: exit_side,
                qty: leg.qty,
                price,
            };
            let _ = self.router.submit(&order, OrderKind::Market);

            let pnl = if leg.side == Side::Buy {
                (price - leg.entry_price) * leg.qty
            } else {
                (leg.entry_price - price) * leg.qty
            };
            self.settle_exit(&leg, pnl, price, ExitReason::Flatten, now_ns);
        }
    }

    fn open_positions(&self) -> Vec<OpenPosition> {
        self.legs
            .iter()
            .map(|leg| {
                let is_long = leg.side == Side::Buy;
                let price = if is_long { self.last_bid } else { self.last_ask };
                let excursion = if is_long {
                    price - leg.entry_price
                } else {
                    leg.entry_price - price
                };
                let open_r = if self.config.hard_stop > 0.0 {
                    excursion / self.config.hard_stop
                } else {
                    0.0
                };
                let risk_free = if is_long {
                    leg.stop >= leg.entry_price
                } else {
                    leg.stop <= leg.entry_price
                };
                OpenPosition {
                    symbol: self.symbol_code.as_str().to_string(),
                    direction: if is_long { 1 } else { -1 },
                    open_r,
                    risk_free,
                }
            })
            .collect()
    }

    fn push_telemetry(&self, record: TelemetryRecord) {
        if let Some(ring) = &self.telemetry {
            ring.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exec::router::RecordingRouter;
    use crate::registry::ServiceRegistry;
    use crate::risk::BlockReason;
    use crate::telemetry::TelemetryRecord;

    const MS: u64 = 1_000_000;

    struct Fixture {
        registry: ServiceRegistry,
        router: Arc<RecordingRouter>,
        exec: SymbolExecutor,
    }

    /// Bootstrap thresholds that complete on the first tick, so tests can
    /// focus on the execution machine itself.
    fn instant_bootstrap() -> BootstrapConfig {
        BootstrapConfig {
            min_book_valid_ms: 0,
            min_tick_count: 1,
            min_spread_samples: 1,
            min_intents: 0,
            max_churn_rate: 1.0,
            min_persistence: 0.0,
            min_mean_edge_bps: 0.0,
            require_kill_switch: false,
            require_spread_guard: false,
        }
    }

    fn fixture_with(tweak: impl FnOnce(&mut ExecutorConfig)) -> Fixture {
        let config = Config::default();
        let registry = ServiceRegistry::build(&config);

        // Green path: FIX logged in, latency FAST, calm market.
        registry.fix.on_connect();
        registry.fix.on_logon();
        for _ in 0..30 {
            registry.latency.record_rtt_ms(2.0);
        }
        registry.governor.update_market_state(0.2, 3.0, 300.0);

        let mut exec_config = ExecutorConfig {
            bootstrap: instant_bootstrap(),
            // Neutralized by default; the decay test overrides it.
            decay_tau_ms: 100_000_000,
            ..Default::default()
        };
        tweak(&mut exec_config);

        let router = Arc::new(RecordingRouter::new());
        let exec = SymbolExecutor::new(
            exec_config,
            Arc::clone(&registry.gatekeeper),
            Arc::clone(&router) as Arc<dyn OrderRouter>,
            Arc::clone(&registry.client_ids),
            Some(Arc::clone(&registry.telemetry)),
        );
        Fixture {
            registry,
            router,
            exec,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn tick(f: &mut Fixture, bid: f64, ask: f64, ts_ms: u64) {
        let ts = ts_ms * MS;
        f.registry.primary_venue.mark_ws_alive(ts);
        f.registry.secondary_venue.mark_ws_alive(ts);
        f.exec.on_quote(
            &QuoteUpdate {
                symbol: SymbolCode::new("XAUUSD"),
                bid,
                ask,
                bid_qty: 10.0,
                ask_qty: 10.0,
                ts_ns: ts,
            },
            ts,
        );
    }

    /// Fully fill the most recent submission at its own price.
    fn fill_last(f: &mut Fixture, ts_ms: u64) {
        let (order, _) = f.router.last_submission().expect("a submission to fill");
        f.exec.on_order_event(&FillEvent::Fill {
            client_id: order.client_id,
            qty: order.qty,
            price: order.price,
            fee: 0.0,
            ts_ns: ts_ms * MS,
        });
    }

    /// Quote pair producing a medium-impulse long signal and an entry.
    fn enter_long(f: &mut Fixture) {
        tick(f, 2400.0, 2400.2, 10_000);
        tick(f, 2400.2, 2400.4, 10_100); // +0.2 mid over 100ms
        assert_eq!(f.exec.state(), ExecState::Entering, "entry not submitted");
        fill_last(f, 10_100);
        assert_eq!(f.exec.state(), ExecState::Holding);
    }

    #[test]
    fn full_pass_enters_at_unit_size() {
        let mut f = fixture();
        enter_long(&mut f);

        let (order, kind) = f.router.last_submission().unwrap();
        assert_eq!(kind, OrderKind::Market);
        assert_eq!(order.side, Side::Buy);
        assert!((order.qty - 1.0).abs() < 1e-9, "qty {}", order.qty);
        assert_eq!(order.price, 2400.4);

        // Reservation reached both ledgers before the submit.
        assert!((f.registry.position_gate.position("XAUUSD") - 1.0).abs() < 1e-9);
        assert_eq!(f.exec.open_leg_count(), 1);
    }

    #[test]
    fn below_impulse_floor_stays_idle() {
        let mut f = fixture();
        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.02, 2400.22, 10_100); // +0.02: below soft floor
        assert_eq!(f.exec.state(), ExecState::Idle);
        assert!(f.router.submissions().is_empty());
    }

    #[test]
    fn blocked_entry_surfaces_reason() {
        let mut f = fixture();
        f.registry.drift.trigger("test desync");

        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.2, 2400.4, 10_100);
        assert_eq!(f.exec.state(), ExecState::Idle);
        assert!(f.router.submissions().is_empty());

        let mut saw_block = false;
        while let Some(record) = f.registry.telemetry.pop() {
            if let TelemetryRecord::Blocked { reason, .. } = record {
                assert_eq!(reason, BlockReason::DriftKill);
                saw_block = true;
            }
        }
        assert!(saw_block);
    }

    #[test]
    fn take_profit_round_trip() {
        let mut f = fixture();
        enter_long(&mut f);

        // TP sits at entry + 2.0 = 2402.4. Wide time gap keeps velocity
        // below the entry floor so the exit is the only action.
        tick(&mut f, 2402.5, 2402.7, 20_000);
        assert_eq!(f.exec.state(), ExecState::Exiting);
        let (exit_order, _) = f.router.last_submission().unwrap();
        assert_eq!(exit_order.side, Side::Sell);

        fill_last(&mut f, 20_000);
        assert_eq!(f.exec.state(), ExecState::Cooldown);
        assert!((f.exec.realized_pnl() - 2.1).abs() < 1e-9);
        assert_eq!(f.exec.open_leg_count(), 0);

        let health = f.registry.symbol_health.snapshot("XAUUSD");
        assert_eq!(health.trades, 1);
        assert_eq!(health.wins, 1);
    }

    #[test]
    fn soft_cooldown_gates_reentry() {
        let mut f = fixture();
        enter_long(&mut f);
        tick(&mut f, 2402.5, 2402.7, 20_000);
        fill_last(&mut f, 20_000);
        assert_eq!(f.exec.state(), ExecState::Cooldown);

        // 400ms later: still cooling (soft tier is 800ms).
        tick(&mut f, 2402.5, 2402.7, 20_400);
        assert_eq!(f.exec.state(), ExecState::Cooldown);

        // 900ms later: released.
        tick(&mut f, 2402.5, 2402.7, 20_900);
        assert_eq!(f.exec.state(), ExecState::Idle);
    }

    #[test]
    fn stop_out_takes_hard_cooldown() {
        let mut f = fixture();
        enter_long(&mut f);

        // Stop sits at entry - 1.5 = 2398.9.
        tick(&mut f, 2398.8, 2399.0, 20_000);
        assert_eq!(f.exec.state(), ExecState::Exiting);
        fill_last(&mut f, 20_000);
        assert!(f.exec.realized_pnl() < 0.0);

        // Soft (800) + hard (400) = 1200ms of cooldown.
        tick(&mut f, 2399.0, 2399.2, 21_100);
        assert_eq!(f.exec.state(), ExecState::Cooldown);
        tick(&mut f, 2399.0, 2399.2, 21_300);
        assert_eq!(f.exec.state(), ExecState::Idle);

        let health = f.registry.symbol_health.snapshot("XAUUSD");
        assert_eq!(health.trades, 1);
        assert_eq!(health.wins, 0);
    }

    #[test]
    fn impulse_decay_forces_exit() {
        let mut f = fixture_with(|c| c.decay_tau_ms = 120);
        enter_long(&mut f);

        // Flat prices: no stop, no TP, no fresh impulse. At +100ms the
        // decay ratio is ~0.43 (warn only).
        tick(&mut f, 2400.2, 2400.4, 10_200);
        assert_eq!(f.exec.state(), ExecState::Holding);

        // At +250ms the ratio is ~0.12, under the 0.30 exit line.
        tick(&mut f, 2400.2, 2400.4, 10_350);
        assert_eq!(f.exec.state(), ExecState::Exiting);

        fill_last(&mut f, 10_350);
        assert_eq!(f.exec.open_leg_count(), 0);
    }

    #[test]
    fn trailing_stop_locks_in_profit() {
        let mut f = fixture();
        enter_long(&mut f);

        // Favorable move arms the trail: stop ratchets to bid - 0.8.
        // The wide gap keeps velocity below the entry floor.
        tick(&mut f, 2402.0, 2402.2, 20_000);
        assert_eq!(f.exec.state(), ExecState::Holding);

        // Pullback through the trailed stop (2401.2) exits in profit.
        tick(&mut f, 2401.0, 2401.2, 30_000);
        assert_eq!(f.exec.state(), ExecState::Exiting);
        fill_last(&mut f, 30_000);
        assert!(f.exec.realized_pnl() > 0.0);
    }

    #[test]
    fn pyramids_once_then_refuses() {
        let mut f = fixture();
        enter_long(&mut f);

        // Strong continuation: trail arms (risk-free), fresh hard impulse,
        // and the policy's +0.5R scale-up condition is met.
        tick(&mut f, 2401.8, 2402.0, 10_200);
        assert_eq!(f.exec.state(), ExecState::Entering, "pyramid not submitted");
        fill_last(&mut f, 10_200);
        assert_eq!(f.exec.open_leg_count(), 2);

        // Another surge cannot add a third leg.
        tick(&mut f, 2403.4, 2403.6, 10_300);
        let entries = f
            .router
            .submissions()
            .iter()
            .filter(|(o, _)| o.side == Side::Buy)
            .count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn sync_reject_unwinds_reservations() {
        let mut f = fixture();
        f.router.reject_next(1);

        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.2, 2400.4, 10_100);

        assert_eq!(f.exec.state(), ExecState::Idle);
        assert_eq!(f.registry.position_gate.position("XAUUSD"), 0.0);
        assert_eq!(f.registry.allocator.global_exposure().reserved, 0.0);
    }

    #[test]
    fn async_reject_returns_to_idle() {
        let mut f = fixture();
        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.2, 2400.4, 10_100);
        assert_eq!(f.exec.state(), ExecState::Entering);

        let (order, _) = f.router.last_submission().unwrap();
        f.exec.on_order_event(&FillEvent::Reject {
            client_id: order.client_id,
            ts_ns: 10_200 * MS,
        });
        assert_eq!(f.exec.state(), ExecState::Idle);
        assert_eq!(f.registry.position_gate.position("XAUUSD"), 0.0);
    }

    #[test]
    fn partial_fills_accumulate_into_one_leg() {
        let mut f = fixture();
        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.2, 2400.4, 10_100);
        let (order, _) = f.router.last_submission().unwrap();

        f.exec.on_order_event(&FillEvent::Fill {
            client_id: order.client_id,
            qty: order.qty * 0.4,
            price: 2400.4,
            fee: 0.0,
            ts_ns: 10_150 * MS,
        });
        assert_eq!(f.exec.state(), ExecState::Entering);
        assert_eq!(f.exec.open_leg_count(), 1);

        f.exec.on_order_event(&FillEvent::Fill {
            client_id: order.client_id,
            qty: order.qty * 0.6,
            price: 2400.6,
            fee: 0.0,
            ts_ns: 10_200 * MS,
        });
        assert_eq!(f.exec.state(), ExecState::Holding);
        assert_eq!(f.exec.open_leg_count(), 1);
    }

    #[test]
    fn flatten_closes_everything() {
        let mut f = fixture();
        enter_long(&mut f);

        f.exec.flatten(11_000 * MS);
        assert_eq!(f.exec.open_leg_count(), 0);
        assert_eq!(f.exec.state(), ExecState::Cooldown);
        assert_eq!(f.router.cancel_alls(), vec!["XAUUSD".to_string()]);
        // The closing order went to the router.
        let exits = f
            .router
            .submissions()
            .iter()
            .filter(|(o, _)| o.side == Side::Sell)
            .count();
        assert_eq!(exits, 1);
    }

    #[test]
    fn not_bootstrapped_observes_but_never_executes() {
        // Real bootstrap thresholds: the first signals are shadow-only.
        let mut f = fixture_with(|c| c.bootstrap = BootstrapConfig::default());
        tick(&mut f, 2400.0, 2400.2, 10_000);
        tick(&mut f, 2400.2, 2400.4, 10_100);

        assert!(f.router.submissions().is_empty());
        assert!(!f.exec.bootstrap().is_complete());
        // The rejected signal was still recorded for the edge gate.
        assert!(f.exec.bootstrap().snapshot().intent_count >= 1);
    }
}

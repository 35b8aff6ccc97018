//! Runtime risk governor
//!
//! Per-intent approval with session-scaled thresholds and a hysteretic
//! volatility/latency lockdown. In lockdown the governor still approves but
//! pins the size multiplier at 0.2; every adaptive parameter update in the
//! system must observe `lockdown()` and freeze while it is set.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use chrono::{Timelike, Utc};
use serde::Serialize;
use tracing::warn;

/// Size multiplier forced while lockdown is active.
const LOCKDOWN_SIZE_MULT: f64 = 0.2;
/// Lockdown engages at 2x base, releases below 1.5x base.
const LOCKDOWN_ENTER_MULT: f64 = 2.0;
const LOCKDOWN_EXIT_MULT: f64 = 1.5;
/// Reject fuse: hard block past this many rejects.
const MAX_REJECTS: i32 = 15;
/// EMA smoothing for latency.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Trading session by UTC hour. Coarser than the capital policy's money
/// windows; used only for threshold scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Session {
    Asia,
    London,
    NewYork,
    Dead,
}

impl Session {
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            0..=6 => Session::Asia,
            7..=12 => Session::London,
            13..=20 => Session::NewYork,
            _ => Session::Dead,
        }
    }

    pub fn now_utc() -> Self {
        Self::from_utc_hour(Utc::now().hour())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub size_mult: f64,
}

impl RiskDecision {
    fn rejected() -> Self {
        Self {
            approved: false,
            size_mult: 0.0,
        }
    }
}

/// Atomic f64 stored as bits; single-writer or last-writer-wins fields.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskGovernorSnapshot {
    pub daily_pnl: f64,
    pub reject_count: i32,
    pub lockdown: bool,
    pub kill_switch: bool,
    pub spread: f64,
    pub vol: f64,
    pub latency_ema_ms: f64,
}

/// Session-aware sizing governor with volatility/latency lockdown.
pub struct RiskGovernor {
    max_daily_loss: f64,
    base_spread_limit: f64,
    base_vol_limit: f64,
    base_latency_ms: f64,

    daily_pnl: AtomicF64,
    reject_count: AtomicI32,
    kill_switch: AtomicBool,
    lockdown: AtomicBool,
    current_spread: AtomicF64,
    current_vol: AtomicF64,
    latency_ema_ms: AtomicF64,
}

impl RiskGovernor {
    pub fn new(
        max_daily_loss: f64,
        base_spread_limit: f64,
        base_vol_limit: f64,
        base_latency_ms: f64,
    ) -> Self {
        Self {
            max_daily_loss,
            base_spread_limit,
            base_vol_limit,
            base_latency_ms,
            daily_pnl: AtomicF64::new(0.0),
            reject_count: AtomicI32::new(0),
            kill_switch: AtomicBool::new(false),
            lockdown: AtomicBool::new(false),
            current_spread: AtomicF64::new(0.0),
            current_vol: AtomicF64::new(0.0),
            latency_ema_ms: AtomicF64::new(0.0),
        }
    }

    /// Feed a market observation. Updates the latency EMA and re-checks the
    /// lockdown latch.
    pub fn update_market_state(&self, spread: f64, volatility: f64, latency_ms: f64) {
        self.current_spread.store(spread);
        self.current_vol.store(volatility);

        let ema = self.latency_ema_ms.load();
        let next = if ema == 0.0 {
            latency_ms
        } else {
            LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * ema
        };
        self.latency_ema_ms.store(next);

        self.check_lockdown();
    }

    fn check_lockdown(&self) {
        let vol = self.current_vol.load();
        let latency = self.latency_ema_ms.load();

        if vol > self.base_vol_limit * LOCKDOWN_ENTER_MULT
            || latency > self.base_latency_ms * LOCKDOWN_ENTER_MULT
        {
            if !self.lockdown.swap(true, Ordering::AcqRel) {
                warn!(vol, latency_ms = latency, "risk governor LOCKDOWN engaged");
            }
        } else if vol < self.base_vol_limit * LOCKDOWN_EXIT_MULT
            && latency < self.base_latency_ms * LOCKDOWN_EXIT_MULT
            && self.lockdown.swap(false, Ordering::AcqRel)
        {
            warn!(vol, latency_ms = latency, "risk governor lockdown released");
        }
    }

    /// Adaptive components poll this and freeze parameter updates while set.
    #[inline]
    pub fn lockdown(&self) -> bool {
        self.lockdown.load(Ordering::Relaxed)
    }

    pub fn record_fill(&self, pnl: f64) {
        // Single-writer from the fill callback thread.
        self.daily_pnl.store(self.daily_pnl.load() + pnl);
    }

    pub fn record_reject(&self) {
        self.reject_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: f64) {
        self.update_market_state(self.current_spread.load(), self.current_vol.load(), latency_ms);
    }

    pub fn reset_daily(&self) {
        self.daily_pnl.store(0.0);
        self.reject_count.store(0, Ordering::Relaxed);
    }

    pub fn set_kill_switch(&self, state: bool) {
        self.kill_switch.store(state, Ordering::Relaxed);
    }

    /// Per-intent evaluation at the given session.
    pub fn evaluate_at(&self, session: Session) -> RiskDecision {
        // Lockdown short-circuits everything: trade tiny, self-heal.
        if self.lockdown() {
            return RiskDecision {
                approved: true,
                size_mult: LOCKDOWN_SIZE_MULT,
            };
        }

        if self.kill_switch.load(Ordering::Relaxed) {
            return RiskDecision::rejected();
        }

        if self.daily_pnl.load() <= -self.max_daily_loss {
            return RiskDecision::rejected();
        }

        if self.current_spread.load() > self.spread_threshold(session) {
            return RiskDecision::rejected();
        }
        if self.current_vol.load() > self.vol_threshold(session) {
            return RiskDecision::rejected();
        }
        if self.latency_ema_ms.load() > self.latency_threshold(session) {
            return RiskDecision::rejected();
        }
        if self.reject_count.load(Ordering::Relaxed) > MAX_REJECTS {
            return RiskDecision::rejected();
        }

        let mult = self.drawdown_multiplier()
            * self.reject_penalty()
            * self.latency_penalty()
            * self.volatility_penalty();

        RiskDecision {
            approved: true,
            size_mult: mult.clamp(0.2, 1.5),
        }
    }

    /// Per-intent evaluation at the current wall-clock session.
    pub fn evaluate(&self) -> RiskDecision {
        self.evaluate_at(Session::now_utc())
    }

    fn spread_threshold(&self, session: Session) -> f64 {
        let mult = match session {
            Session::London => 1.0,
            Session::NewYork => 1.1,
            Session::Asia => 0.8,
            Session::Dead => 0.6,
        };
        self.base_spread_limit * mult
    }

    fn vol_threshold(&self, session: Session) -> f64 {
        let mult = match session {
            Session::London => 1.2,
            Session::NewYork => 1.3,
            Session::Asia => 0.9,
            Session::Dead => 0.7,
        };
        self.base_vol_limit * mult
    }

    fn latency_threshold(&self, session: Session) -> f64 {
        let mult = match session {
            Session::NewYork => 1.1,
            Session::London => 1.0,
            _ => 0.9,
        };
        self.base_latency_ms * mult
    }

    fn drawdown_multiplier(&self) -> f64 {
        let dd_ratio = (-self.daily_pnl.load() / self.max_daily_loss).max(0.0);
        1.0 - dd_ratio * 0.5
    }

    fn reject_penalty(&self) -> f64 {
        (1.0 - self.reject_count.load(Ordering::Relaxed) as f64 * 0.03).max(0.5)
    }

    fn latency_penalty(&self) -> f64 {
        let latency = self.latency_ema_ms.load();
        if latency < self.base_latency_ms * 0.5 {
            1.1
        } else if latency > self.base_latency_ms {
            0.7
        } else {
            1.0
        }
    }

    fn volatility_penalty(&self) -> f64 {
        let vol = self.current_vol.load();
        if vol > self.base_vol_limit * 0.8 {
            0.8
        } else if vol < self.base_vol_limit * 0.5 {
            1.1
        } else {
            1.0
        }
    }

    pub fn snapshot(&self) -> RiskGovernorSnapshot {
        RiskGovernorSnapshot {
            daily_pnl: self.daily_pnl.load(),
            reject_count: self.reject_count.load(Ordering::Relaxed),
            lockdown: self.lockdown(),
            kill_switch: self.kill_switch.load(Ordering::Relaxed),
            spread: self.current_spread.load(),
            vol: self.current_vol.load(),
            latency_ema_ms: self.latency_ema_ms.load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // base_vol = 5.0, base_latency = 500ms
    fn governor() -> RiskGovernor {
        RiskGovernor::new(1000.0, 1.0, 5.0, 500.0)
    }

    #[test]
    fn session_from_hour() {
        assert_eq!(Session::from_utc_hour(3), Session::Asia);
        assert_eq!(Session::from_utc_hour(9), Session::London);
        assert_eq!(Session::from_utc_hour(15), Session::NewYork);
        assert_eq!(Session::from_utc_hour(22), Session::Dead);
    }

    #[test]
    fn approves_calm_market() {
        let g = governor();
        g.update_market_state(0.5, 3.0, 300.0);
        let d = g.evaluate_at(Session::London);
        assert!(d.approved);
        assert!(d.size_mult >= 0.2 && d.size_mult <= 1.5);
    }

    #[test]
    fn lockdown_engages_and_releases_hysteretically() {
        let g = governor();

        // Vol shock: 11 > 2 x 5 engages lockdown.
        g.update_market_state(0.5, 11.0, 400.0);
        assert!(g.lockdown());
        let d = g.evaluate_at(Session::London);
        assert!(d.approved);
        assert_eq!(d.size_mult, LOCKDOWN_SIZE_MULT);

        // Vol eases to 8: above the 1.5x release line, still locked.
        g.update_market_state(0.5, 8.0, 400.0);
        assert!(g.lockdown());

        // Vol fine but latency spikes past the release line: still locked.
        // The latency EMA needs sustained samples to cross 750ms.
        for _ in 0..60 {
            g.update_market_state(0.5, 7.0, 1000.0);
        }
        assert!(g.lockdown());

        // Both below 1.5x base: lockdown releases.
        for _ in 0..80 {
            g.update_market_state(0.5, 4.0, 400.0);
        }
        assert!(!g.lockdown());
        let d = g.evaluate_at(Session::London);
        assert!(d.approved);
        assert_ne!(d.size_mult, LOCKDOWN_SIZE_MULT);
    }

    #[test]
    fn kill_switch_rejects() {
        let g = governor();
        g.update_market_state(0.5, 3.0, 300.0);
        g.set_kill_switch(true);
        assert!(!g.evaluate_at(Session::London).approved);
        g.set_kill_switch(false);
        assert!(g.evaluate_at(Session::London).approved);
    }

    #[test]
    fn daily_loss_rejects() {
        let g = governor();
        g.update_market_state(0.5, 3.0, 300.0);
        g.record_fill(-1500.0);
        assert!(!g.evaluate_at(Session::London).approved);
        g.reset_daily();
        assert!(g.evaluate_at(Session::London).approved);
    }

    #[test]
    fn session_scales_vol_threshold() {
        let g = governor();
        // Vol 6.2: above London ceiling (6.0), below NY ceiling (6.5).
        g.update_market_state(0.5, 6.2, 300.0);
        assert!(!g.evaluate_at(Session::London).approved);
        assert!(g.evaluate_at(Session::NewYork).approved);
    }

    #[test]
    fn drawdown_shrinks_size() {
        let g = governor();
        g.update_market_state(0.5, 3.0, 300.0);
        let full = g.evaluate_at(Session::London).size_mult;

        g.record_fill(-500.0); // half the budget gone
        let reduced = g.evaluate_at(Session::London).size_mult;
        assert!(reduced < full);
    }

    #[test]
    fn reject_fuse_blocks() {
        let g = governor();
        g.update_market_state(0.5, 3.0, 300.0);
        for _ in 0..16 {
            g.record_reject();
        }
        assert!(!g.evaluate_at(Session::London).approved);
    }

    #[test]
    fn size_mult_clamped() {
        let g = governor();
        // Fast link and quiet vol: both bonuses apply, clamped at 1.5.
        g.update_market_state(0.5, 1.0, 100.0);
        let d = g.evaluate_at(Session::London);
        assert!(d.approved);
        assert!(d.size_mult <= 1.5);
    }
}

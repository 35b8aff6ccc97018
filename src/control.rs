//! Operator control plane
//!
//! The only surface allowed to reset latches and flip symbol enablement.
//! Every action is logged; none of these paths are ever called from hot
//! threads.

use std::sync::Arc;

use tracing::info;

use crate::capital::CapitalAllocator;
use crate::gates::{DailyLossGuard, SymbolHealthTracker};
use crate::risk::{DriftDetector, RiskGovernor};

pub struct ControlPlane {
    pub loss_guard: Arc<DailyLossGuard>,
    pub drift: Arc<DriftDetector>,
    pub symbol_health: Arc<SymbolHealthTracker>,
    pub governor: Arc<RiskGovernor>,
    pub allocator: Arc<CapitalAllocator>,
}

impl ControlPlane {
    /// New trading day: clear the loss guard and the governor's daily
    /// counters. Call only with the engines quiesced.
    pub fn reset_daily_guard(&self) {
        info!("operator: daily guard reset");
        self.loss_guard.reset();
        self.governor.reset_daily();
    }

    /// Clear a latched drift kill after manual reconciliation.
    pub fn clear_drift_kill(&self) {
        info!("operator: drift kill clear requested");
        self.drift.clear_kill();
    }

    pub fn set_symbol_enabled(&self, symbol: &str, enabled: bool) {
        info!(symbol, enabled, "operator: symbol enablement");
        self.symbol_health.set_enabled(symbol, enabled);
    }

    /// Hot-swap the engine capital split.
    pub fn set_engine_weights(&self, hft: f64, structure: f64) {
        info!(hft, structure, "operator: engine weights");
        self.allocator.update_engine_weights(hft, structure);
    }

    /// Hot-swap the daily loss limit.
    pub fn set_daily_loss_limit(&self, limit: f64) {
        info!(limit, "operator: daily loss limit");
        self.loss_guard.set_limit(limit);
    }

    pub fn set_kill_switch(&self, on: bool) {
        info!(on, "operator: kill switch");
        self.governor.set_kill_switch(on);
    }
}

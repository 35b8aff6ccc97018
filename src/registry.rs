//! Service registry
//!
//! All shared governors are constructed once at startup and handed around
//! by reference. No true singletons: tests build as many registries as
//! they like, each fully isolated.

use std::sync::Arc;

use crate::capital::CapitalAllocator;
use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::control::ControlPlane;
use crate::exec::gatekeeper::Gatekeeper;
use crate::exec::router::ClientIdAllocator;
use crate::gates::{DailyLossGuard, DeltaGate, SymbolHealthTracker};
use crate::latency::{LatencyGovernor, RegimeThresholds};
use crate::position::PositionBook;
use crate::risk::{CapitalPolicy, DriftDetector, ExchangeTruth, PositionGate, RiskGovernor};
use crate::telemetry::TelemetryRing;
use crate::venue::{ExecutionArbiter, FixLink, FixLinkConfig, VenueHealth, VenueHealthConfig};
use crate::watchdog::WatchdogState;

/// Process-wide shared services. Everything here is thread-safe; ownership
/// stays with the registry and users hold `Arc` clones.
pub struct ServiceRegistry {
    pub clock: Arc<dyn Clock>,
    pub primary_venue: Arc<VenueHealth>,
    pub secondary_venue: Arc<VenueHealth>,
    pub fix: Arc<FixLink>,
    pub arbiter: Arc<ExecutionArbiter>,
    pub latency: Arc<LatencyGovernor>,
    pub delta: Arc<DeltaGate>,
    pub loss_guard: Arc<DailyLossGuard>,
    pub symbol_health: Arc<SymbolHealthTracker>,
    pub truth: Arc<ExchangeTruth>,
    pub drift: Arc<DriftDetector>,
    pub policy: Arc<CapitalPolicy>,
    pub governor: Arc<RiskGovernor>,
    pub position_gate: Arc<PositionGate>,
    pub allocator: Arc<CapitalAllocator>,
    pub gatekeeper: Arc<Gatekeeper>,
    pub client_ids: Arc<ClientIdAllocator>,
    pub book: Arc<PositionBook>,
    pub telemetry: Arc<TelemetryRing>,
    pub watchdog: Arc<WatchdogState>,
}

impl ServiceRegistry {
    pub fn build(config: &Config) -> Self {
        Self::build_with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn build_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let venue_cfg = VenueHealthConfig {
            staleness_max_ns: config.venue_staleness_max_ns,
            latency_max_ns: config.venue_latency_max_ns,
            reject_max: config.venue_reject_max,
        };

        let primary_venue = Arc::new(VenueHealth::new());
        let secondary_venue = Arc::new(VenueHealth::new());
        let fix = Arc::new(FixLink::new(FixLinkConfig::default()));
        let arbiter = Arc::new(ExecutionArbiter::new(
            Arc::clone(&primary_venue),
            Arc::clone(&secondary_venue),
            Arc::clone(&fix),
            venue_cfg,
        ));

        let latency = Arc::new(LatencyGovernor::new(
            config.latency_window_size,
            RegimeThresholds {
                fast_p95_ms: config.fast_regime_p95_ms,
                normal_p95_ms: config.normal_regime_p95_ms,
                ..RegimeThresholds::default()
            },
        ));

        let delta = Arc::new(DeltaGate::new());
        let loss_guard = Arc::new(DailyLossGuard::new(config.daily_loss_limit));
        let symbol_health = Arc::new(SymbolHealthTracker::new());
        let truth = Arc::new(ExchangeTruth::new());
        let drift = Arc::new(DriftDetector::new());
        let policy = Arc::new(CapitalPolicy::new());
        let governor = Arc::new(RiskGovernor::new(
            config.daily_loss_limit,
            config.base_spread_limit,
            config.base_vol_limit,
            config.base_latency_ms,
        ));
        let position_gate = Arc::new(PositionGate::new(config.max_position_per_symbol));
        let allocator = Arc::new(CapitalAllocator::new(
            config.global_notional_cap,
            config.hft_weight,
            config.structure_weight,
        ));

        let gatekeeper = Arc::new(Gatekeeper {
            symbol_health: Arc::clone(&symbol_health),
            drift: Arc::clone(&drift),
            loss_guard: Arc::clone(&loss_guard),
            delta: Arc::clone(&delta),
            arbiter: Arc::clone(&arbiter),
            latency: Arc::clone(&latency),
            governor: Arc::clone(&governor),
            policy: Arc::clone(&policy),
            position_gate: Arc::clone(&position_gate),
            allocator: Arc::clone(&allocator),
        });

        Self {
            clock,
            primary_venue,
            secondary_venue,
            fix,
            arbiter,
            latency,
            delta,
            loss_guard,
            symbol_health,
            truth,
            drift,
            policy,
            governor,
            position_gate,
            allocator,
            gatekeeper,
            client_ids: Arc::new(ClientIdAllocator::new()),
            book: Arc::new(PositionBook::new()),
            telemetry: Arc::new(TelemetryRing::with_capacity(config.telemetry_capacity)),
            watchdog: Arc::new(WatchdogState::new()),
        }
    }

    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane {
            loss_guard: Arc::clone(&self.loss_guard),
            drift: Arc::clone(&self.drift),
            symbol_health: Arc::clone(&self.symbol_health),
            governor: Arc::clone(&self.governor),
            allocator: Arc::clone(&self.allocator),
        }
    }
}

//! Execution arbiter
//!
//! Folds the health of both venues and the FIX link into one pre-trade
//! decision. Each venue contributes a tier multiplier (healthy 1.0,
//! degraded 0.5, dead 0.0); the final size multiplier is the minimum of the
//! venue tiers and the FIX multiplier.

use std::sync::Arc;

use serde::Serialize;

use crate::venue::fix_state::FixLink;
use crate::venue::health::{VenueHealth, VenueHealthConfig};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArbiterDecision {
    pub allow: bool,
    pub size_mult: f64,
}

/// Composite venue-health decision layer.
pub struct ExecutionArbiter {
    primary: Arc<VenueHealth>,
    secondary: Arc<VenueHealth>,
    fix: Arc<FixLink>,
    config: VenueHealthConfig,
}

impl ExecutionArbiter {
    pub fn new(
        primary: Arc<VenueHealth>,
        secondary: Arc<VenueHealth>,
        fix: Arc<FixLink>,
        config: VenueHealthConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            fix,
            config,
        }
    }

    fn venue_mult(&self, venue: &VenueHealth, now_ns: u64) -> f64 {
        if venue.can_trade(now_ns, &self.config) {
            1.0
        } else if venue.degraded(now_ns, &self.config) {
            0.5
        } else {
            0.0
        }
    }

    /// Hot-path decision: atomic loads only.
    #[inline]
    pub fn decide(&self, now_ns: u64) -> ArbiterDecision {
        let venue_mult = self
            .venue_mult(&self.primary, now_ns)
            .min(self.venue_mult(&self.secondary, now_ns));
        let size_mult = venue_mult.min(self.fix.size_multiplier());

        ArbiterDecision {
            allow: size_mult > 0.0 && self.fix.allow_new_orders(),
            size_mult,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn arbiter() -> (Arc<VenueHealth>, Arc<VenueHealth>, Arc<FixLink>, ExecutionArbiter) {
        let primary = Arc::new(VenueHealth::new());
        let secondary = Arc::new(VenueHealth::new());
        let fix = Arc::new(FixLink::default());
        let arb = ExecutionArbiter::new(
            Arc::clone(&primary),
            Arc::clone(&secondary),
            Arc::clone(&fix),
            VenueHealthConfig::default(),
        );
        (primary, secondary, fix, arb)
    }

    fn all_healthy(primary: &VenueHealth, secondary: &VenueHealth, fix: &FixLink, now: u64) {
        primary.mark_ws_alive(now);
        secondary.mark_ws_alive(now);
        fix.on_connect();
        fix.on_logon();
    }

    #[test]
    fn healthy_stack_full_size() {
        let (p, s, f, arb) = arbiter();
        all_healthy(&p, &s, &f, 10 * SEC);
        let d = arb.decide(10 * SEC + 1);
        assert!(d.allow);
        assert_eq!(d.size_mult, 1.0);
    }

    #[test]
    fn degraded_fix_halves() {
        let (p, s, f, arb) = arbiter();
        all_healthy(&p, &s, &f, 10 * SEC);
        for _ in 0..3 {
            f.on_reject();
        }
        let d = arb.decide(10 * SEC + 1);
        assert!(d.allow);
        assert_eq!(d.size_mult, 0.5);
    }

    #[test]
    fn stale_secondary_halves() {
        let (p, s, f, arb) = arbiter();
        all_healthy(&p, &s, &f, 10 * SEC);
        // Secondary goes quiet for 10s while primary keeps ticking.
        p.mark_ws_alive(20 * SEC);
        let d = arb.decide(20 * SEC);
        assert!(d.allow);
        assert_eq!(d.size_mult, 0.5);
    }

    #[test]
    fn dead_venue_blocks() {
        let (p, s, f, arb) = arbiter();
        all_healthy(&p, &s, &f, 10 * SEC);
        s.mark_ws_dead();
        let d = arb.decide(10 * SEC + 1);
        assert!(!d.allow);
        assert_eq!(d.size_mult, 0.0);
    }

    #[test]
    fn halted_fix_blocks() {
        let (p, s, f, arb) = arbiter();
        all_healthy(&p, &s, &f, 10 * SEC);
        for _ in 0..6 {
            f.on_reject();
        }
        let d = arb.decide(10 * SEC + 1);
        assert!(!d.allow);
        assert_eq!(d.size_mult, 0.0);
    }
}

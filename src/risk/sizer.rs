//! Sizing composition
//!
//! Entry size is the product of independent factors: impulse tier (how hard
//! price is moving relative to the symbol's floors), latency tier, the
//! drawdown throttle from the loss guard and a Bayesian edge posterior.
//! Take-profit distance scales with the latency regime: a slow link cannot
//! hold out for the full target.

use serde::Serialize;

use crate::latency::LatencyRegime;

/// Impulse classification against a symbol's velocity floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImpulseTier {
    /// Below the soft floor: no entry.
    None,
    /// Probe size.
    Soft,
    /// Full size.
    Medium,
    /// Conviction add, hard-capped.
    Hard,
}

impl ImpulseTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ImpulseTier::None => "NONE",
            ImpulseTier::Soft => "SOFT",
            ImpulseTier::Medium => "MEDIUM",
            ImpulseTier::Hard => "HARD",
        }
    }
}

/// Per-symbol velocity floors. Units are symbol price points per tick
/// window, matched to each symbol's tick profile.
#[derive(Debug, Clone, Copy)]
pub struct ImpulseProfile {
    pub soft: f64,
    pub medium: f64,
    pub hard: f64,
}

impl Default for ImpulseProfile {
    fn default() -> Self {
        Self {
            soft: 0.08,
            medium: 0.15,
            hard: 0.30,
        }
    }
}

/// Absolute ceiling on the composed size multiplier.
const MAX_SIZE_MULT: f64 = 1.2;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeDecision {
    pub multiplier: f64,
    pub tier: ImpulseTier,
    pub tp_scale: f64,
}

/// Impulse tier x latency tier composition.
pub struct ImpulseSizer;

impl ImpulseSizer {
    pub fn classify(profile: &ImpulseProfile, velocity: f64) -> ImpulseTier {
        let v = velocity.abs();
        if v >= profile.hard {
            ImpulseTier::Hard
        } else if v >= profile.medium {
            ImpulseTier::Medium
        } else if v >= profile.soft {
            ImpulseTier::Soft
        } else {
            ImpulseTier::None
        }
    }

    fn tier_multiplier(tier: ImpulseTier) -> f64 {
        match tier {
            ImpulseTier::None => 0.0,
            ImpulseTier::Soft => 0.5,
            ImpulseTier::Medium => 1.0,
            ImpulseTier::Hard => 1.2,
        }
    }

    fn latency_factor(regime: LatencyRegime) -> f64 {
        match regime {
            LatencyRegime::Fast => 1.0,
            LatencyRegime::Normal => 0.6,
            LatencyRegime::Degraded => 0.0,
        }
    }

    /// Compose impulse and latency into a size multiplier plus the
    /// matching TP scale.
    pub fn compute(
        profile: &ImpulseProfile,
        regime: LatencyRegime,
        velocity: f64,
    ) -> SizeDecision {
        let tier = Self::classify(profile, velocity);
        let multiplier =
            (Self::tier_multiplier(tier) * Self::latency_factor(regime)).min(MAX_SIZE_MULT);
        SizeDecision {
            multiplier,
            tier,
            tp_scale: LatencyAwareTp::scale(regime),
        }
    }
}

/// Latency-aware take-profit scaling. On a degraded link the fill you see
/// is already old; shrink the target instead of chasing it.
pub struct LatencyAwareTp;

impl LatencyAwareTp {
    pub fn scale(regime: LatencyRegime) -> f64 {
        match regime {
            LatencyRegime::Fast => 1.0,
            LatencyRegime::Normal => 0.75,
            LatencyRegime::Degraded => 0.5,
        }
    }
}

/// Beta posterior over trade outcomes, weighted by inverse volatility so a
/// streak inside one volatility cluster does not dominate the estimate.
#[derive(Debug, Clone)]
pub struct BayesianEdge {
    alpha: f64,
    beta: f64,
}

impl BayesianEdge {
    pub fn new() -> Self {
        // Uniform prior.
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn record_trade(&mut self, win: bool, volatility: f64) {
        let weight = (1.0 / volatility.max(0.1)).clamp(0.2, 2.0);
        if win {
            self.alpha += weight;
        } else {
            self.beta += weight;
        }
    }

    /// Posterior mean win probability.
    pub fn edge_probability(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Kelly-style size with drawdown protection. The fraction is clamped
    /// to [0.1, 1.0] so a cold posterior still probes.
    pub fn kelly_size(&self, base_size: f64, drawdown_ratio: f64) -> f64 {
        let edge = self.edge_probability();
        let mut kelly_fraction = edge * 2.0 - 1.0;
        kelly_fraction *= 1.0 - drawdown_ratio.clamp(0.0, 0.8);
        base_size * kelly_fraction.clamp(0.1, 1.0)
    }

    pub fn observations(&self) -> f64 {
        self.alpha + self.beta - 2.0
    }
}

impl Default for BayesianEdge {
    fn default() -> Self {
        Self::new()
    }
}

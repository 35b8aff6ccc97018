//! Risk governance
//!
//! Pre-trade capital policy, the runtime risk governor, sizing composition,
//! drift reconciliation and the authoritative position gate.

pub mod drift;
pub mod governor;
pub mod policy;
pub mod position_gate;
pub mod sizer;

pub use drift::{DriftDetector, ExchangePosition, ExchangeTruth};
pub use governor::{RiskDecision, RiskGovernor, Session};
pub use policy::{
    BlockReason, CapitalDecision, CapitalLadder, CapitalPolicy, OpenPosition, PolicyInput,
    SessionWindow, SymbolTier,
};
pub use position_gate::PositionGate;
pub use sizer::{BayesianEdge, ImpulseProfile, ImpulseSizer, ImpulseTier, LatencyAwareTp, SizeDecision};

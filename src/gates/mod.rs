//! Single-purpose gates
//!
//! Leaf governors with one decision each: microstructure stress, daily
//! loss, symbol health and bootstrap readiness.

pub mod bootstrap;
pub mod delta;
pub mod loss_guard;
pub mod microstructure;
pub mod symbol_health;

pub use bootstrap::{BootstrapConfig, BootstrapEvaluator, BootstrapState};
pub use delta::{DeltaGate, GateState};
pub use loss_guard::DailyLossGuard;
pub use microstructure::MicrostructureMonitor;
pub use symbol_health::SymbolHealthTracker;

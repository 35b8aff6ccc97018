//! Venue health and execution arbitration
//!
//! Per-venue liveness/latency tracking, the FIX link degraded-state machine
//! and the arbiter that folds both into a single allow/size decision.

pub mod arbiter;
pub mod fix_state;
pub mod health;

pub use arbiter::{ArbiterDecision, ExecutionArbiter};
pub use fix_state::{FixLink, FixLinkConfig, FixState};
pub use health::{VenueHealth, VenueHealthConfig, VenueHealthSnapshot};

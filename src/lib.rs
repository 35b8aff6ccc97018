//! Chimera execution core
//!
//! Multi-venue, multi-asset execution governor: a lattice of cooperating
//! state machines that decides, on every market event, whether a trade
//! intent may pass, at what size, and when it must be unwound.
//!
//! # Layering
//!
//! ```text
//! L0  intent, ring            typed records + lock-free MPSC transport
//! L1  venue, latency, gates   single-purpose health and readiness gates
//! L2  risk, capital           policy, sizing, exposure reservation
//! L3  position, drift         local book vs exchange truth
//! L4  exec                    gatekeeper, per-symbol executors, scheduler
//! L5  watchdog                external liveness, flatten on hang
//! ```
//!
//! Transports, telemetry servers and dashboards are collaborators behind
//! the `OrderRouter`, feed and `TelemetrySink` interfaces; the core stays
//! free of I/O on the hot path.

pub mod capital;
pub mod clock;
pub mod config;
pub mod control;
pub mod exec;
pub mod feed;
pub mod gates;
pub mod hysteresis;
pub mod intent;
pub mod journal;
pub mod latency;
pub mod position;
pub mod registry;
pub mod ring;
pub mod risk;
pub mod telemetry;
pub mod venue;
pub mod watchdog;

pub use config::{Config, ConfigError};
pub use intent::{Intent, Side, SymbolCode};
pub use registry::ServiceRegistry;
pub use ring::IntentRing;

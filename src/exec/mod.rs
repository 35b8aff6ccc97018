//! Execution layer
//!
//! Gate lattice traversal, per-symbol state machines, order routing and
//! the pinned consumer scheduler.

pub mod executor;
pub mod gatekeeper;
pub mod router;
pub mod scheduler;

pub use executor::{ExecState, ExecutorConfig, ExitReason, MarketCtx, SymbolExecutor};
pub use gatekeeper::{GateContext, GateDecision, Gatekeeper};
pub use router::{
    ClientIdAllocator, FillEvent, FillFanout, OrderKind, OrderRouter, RecordingRouter,
    SubmitOutcome,
};
pub use scheduler::{fixed_ctx, wall_clock_ctx, CoreScheduler, MarketCtxProvider, SymbolLane};

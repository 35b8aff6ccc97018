//! Capital allocation
//!
//! The notional exposure ledger shared by every engine and symbol.

pub mod allocator;

pub use allocator::{
    AllocatorSnapshot, CapitalAllocator, Engine, ExposureSlot, OrderIntent,
};

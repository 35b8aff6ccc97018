//! Microstructure stress gate
//!
//! Single atomic execution gate written by the microstructure monitor and
//! read on every intent. Lock-free, allocation-free, deterministic.

use std::sync::atomic::{AtomicU8, Ordering};

/// Gate state derived from microstructure stress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    /// Normal trading, all intents pass.
    Allow = 0,
    /// Elevated stress, halve size.
    Throttle = 1,
    /// High stress, no new intents.
    Block = 2,
}

impl GateState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => GateState::Allow,
            1 => GateState::Throttle,
            _ => GateState::Block,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Allow => "ALLOW",
            GateState::Throttle => "THROTTLE",
            GateState::Block => "BLOCK",
        }
    }
}

/// Atomic execution gate driven by microstructure stress.
pub struct DeltaGate {
    state: AtomicU8,
}

impl DeltaGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GateState::Allow as u8),
        }
    }

    #[inline]
    pub fn set_allow(&self) {
        self.state.store(GateState::Allow as u8, Ordering::Release);
    }

    #[inline]
    pub fn set_throttle(&self) {
        self.state
            .store(GateState::Throttle as u8, Ordering::Release);
    }

    #[inline]
    pub fn set_block(&self) {
        self.state.store(GateState::Block as u8, Ordering::Release);
    }

    /// Map a stress level (0.0 calm .. 1.0 extreme) onto the gate.
    #[inline]
    pub fn set_from_stress(&self, stress: f64) {
        if stress >= 0.8 {
            self.set_block();
        } else if stress >= 0.5 {
            self.set_throttle();
        } else {
            self.set_allow();
        }
    }

    #[inline]
    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn can_trade(&self) -> bool {
        self.state() == GateState::Allow
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.state() == GateState::Block
    }

    /// Position size multiplier: 1.0 full, 0.5 throttled, 0.0 blocked.
    #[inline]
    pub fn size_multiplier(&self) -> f64 {
        match self.state() {
            GateState::Allow => 1.0,
            GateState::Throttle => 0.5,
            GateState::Block => 0.0,
        }
    }
}

impl Default for DeltaGate {
    fn default() -> Self {
        Self::new()
    }
}

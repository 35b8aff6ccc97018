//! FIX link degraded-state machine
//!
//! Connection lifecycle plus quality demotion driven by rejects, timeouts,
//! ACK latency EMA and RX staleness. Degraded halves order size; halted
//! blocks new orders entirely. Thresholds were chosen empirically and are
//! kept as configuration.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use tracing::warn;

/// Link state chain. Demotions are driven by `update_state`; promotions only
/// happen through logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FixState {
    Disconnected = 0,
    Connecting = 1,
    LoggedIn = 2,
    Degraded = 3,
    Halted = 4,
}

impl FixState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FixState::Disconnected,
            1 => FixState::Connecting,
            2 => FixState::LoggedIn,
            3 => FixState::Degraded,
            _ => FixState::Halted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FixState::Disconnected => "DISCONNECTED",
            FixState::Connecting => "CONNECTING",
            FixState::LoggedIn => "LOGGED_IN",
            FixState::Degraded => "DEGRADED",
            FixState::Halted => "HALTED",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixLinkConfig {
    /// Rejects before demotion to Degraded; 2x halts.
    pub max_rejects: u32,
    /// Timeouts before demotion to Degraded; 2x halts.
    pub max_timeouts: u32,
    /// ACK latency EMA ceiling (microseconds).
    pub max_latency_us: u64,
    /// No inbound traffic for this long halts the link.
    pub rx_stall_ns: u64,
}

impl Default for FixLinkConfig {
    fn default() -> Self {
        Self {
            max_rejects: 3,
            max_timeouts: 2,
            max_latency_us: 8_000,
            rx_stall_ns: 200_000_000, // 200ms
        }
    }
}

/// Lock-free FIX session quality tracker.
pub struct FixLink {
    config: FixLinkConfig,
    state: AtomicU8,
    last_rx_ns: AtomicU64,
    last_tx_ns: AtomicU64,
    reject_count: AtomicU32,
    timeout_count: AtomicU32,
    latency_us_ema: AtomicU64,
}

impl FixLink {
    pub fn new(config: FixLinkConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(FixState::Disconnected as u8),
            last_rx_ns: AtomicU64::new(0),
            last_tx_ns: AtomicU64::new(0),
            reject_count: AtomicU32::new(0),
            timeout_count: AtomicU32::new(0),
            latency_us_ema: AtomicU64::new(0),
        }
    }

    pub fn on_connect(&self) {
        self.state
            .store(FixState::Connecting as u8, Ordering::Release);
    }

    /// Successful logon clears the fault counters.
    pub fn on_logon(&self) {
        self.reject_count.store(0, Ordering::Relaxed);
        self.timeout_count.store(0, Ordering::Relaxed);
        self.state.store(FixState::LoggedIn as u8, Ordering::Release);
    }

    pub fn on_disconnect(&self) {
        self.state
            .store(FixState::Disconnected as u8, Ordering::Release);
    }

    #[inline]
    pub fn on_rx(&self, now_ns: u64) {
        self.last_rx_ns.fetch_max(now_ns, Ordering::AcqRel);
    }

    #[inline]
    pub fn on_tx(&self, now_ns: u64) {
        self.last_tx_ns.fetch_max(now_ns, Ordering::AcqRel);
    }

    /// Record one ACK latency sample into the 7/8 EMA.
    pub fn on_latency(&self, latency_us: u64) {
        let ema = self.latency_us_ema.load(Ordering::Relaxed);
        let next = if ema == 0 {
            latency_us
        } else {
            (ema * 7 + latency_us) / 8
        };
        self.latency_us_ema.store(next, Ordering::Relaxed);
        self.update_state();
    }

    pub fn on_reject(&self) {
        self.reject_count.fetch_add(1, Ordering::Relaxed);
        self.update_state();
    }

    pub fn on_timeout(&self) {
        self.timeout_count.fetch_add(1, Ordering::Relaxed);
        self.update_state();
    }

    /// Periodic staleness check; called from the watchdog cadence with an
    /// external clock, since a stalled link generates no events to hook.
    pub fn poll(&self, now_ns: u64) {
        let state = self.state();
        if state != FixState::LoggedIn && state != FixState::Degraded {
            return;
        }
        let last_rx = self.last_rx_ns.load(Ordering::Acquire);
        if last_rx != 0 && now_ns.saturating_sub(last_rx) > self.config.rx_stall_ns {
            self.halt("rx stall");
        }
    }

    #[inline]
    pub fn state(&self) -> FixState {
        FixState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// New orders allowed while logged in or merely degraded.
    #[inline]
    pub fn allow_new_orders(&self) -> bool {
        matches!(self.state(), FixState::LoggedIn | FixState::Degraded)
    }

    /// Degraded halves size; halted blocks.
    #[inline]
    pub fn size_multiplier(&self) -> f64 {
        match self.state() {
            FixState::Degraded => 0.5,
            FixState::Halted => 0.0,
            _ => 1.0,
        }
    }

    #[inline]
    pub fn latency_ema_us(&self) -> u64 {
        self.latency_us_ema.load(Ordering::Relaxed)
    }

    fn halt(&self, reason: &str) {
        let prev = self.state.swap(FixState::Halted as u8, Ordering::AcqRel);
        if FixState::from_u8(prev) != FixState::Halted {
            warn!(reason, "fix link HALTED");
        }
    }

    fn update_state(&self) {
        let rejects = self.reject_count.load(Ordering::Relaxed);
        let timeouts = self.timeout_count.load(Ordering::Relaxed);
        let latency = self.latency_us_ema.load(Ordering::Relaxed);

        if self.state() == FixState::LoggedIn
            && (rejects >= self.config.max_rejects
                || timeouts >= self.config.max_timeouts
                || latency > self.config.max_latency_us)
        {
            self.state.store(FixState::Degraded as u8, Ordering::Release);
            warn!(rejects, timeouts, latency_us = latency, "fix link DEGRADED");
        }

        if self.state() == FixState::Degraded
            && (rejects >= self.config.max_rejects * 2 || timeouts >= self.config.max_timeouts * 2)
        {
            self.halt("fault counters doubled");
        }
    }
}

impl Default for FixLink {
    fn default() -> Self {
        Self::new(FixLinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in_link() -> FixLink {
        let link = FixLink::default();
        link.on_connect();
        link.on_logon();
        link
    }

    #[test]
    fn lifecycle_chain() {
        let link = FixLink::default();
        assert_eq!(link.state(), FixState::Disconnected);
        assert!(!link.allow_new_orders());

        link.on_connect();
        assert_eq!(link.state(), FixState::Connecting);

        link.on_logon();
        assert_eq!(link.state(), FixState::LoggedIn);
        assert!(link.allow_new_orders());
        assert_eq!(link.size_multiplier(), 1.0);

        link.on_disconnect();
        assert_eq!(link.state(), FixState::Disconnected);
    }

    #[test]
    fn rejects_degrade_then_halt() {
        let link = logged_in_link();
        for _ in 0..3 {
            link.on_reject();
        }
        assert_eq!(link.state(), FixState::Degraded);
        assert!(link.allow_new_orders());
        assert_eq!(link.size_multiplier(), 0.5);

        for _ in 0..3 {
            link.on_reject();
        }
        assert_eq!(link.state(), FixState::Halted);
        assert!(!link.allow_new_orders());
        assert_eq!(link.size_multiplier(), 0.0);
    }

    #[test]
    fn latency_ema_degrades() {
        let link = logged_in_link();
        // Drive the EMA over the 8ms ceiling.
        for _ in 0..30 {
            link.on_latency(20_000);
        }
        assert_eq!(link.state(), FixState::Degraded);
    }

    #[test]
    fn rx_stall_halts() {
        let link = logged_in_link();
        link.on_rx(1_000_000_000);
        link.poll(1_100_000_000); // 100ms quiet: fine
        assert_eq!(link.state(), FixState::LoggedIn);

        link.poll(1_300_000_000); // 300ms quiet: stall
        assert_eq!(link.state(), FixState::Halted);
    }

    #[test]
    fn logon_clears_faults() {
        let link = logged_in_link();
        for _ in 0..6 {
            link.on_reject();
        }
        assert_eq!(link.state(), FixState::Halted);

        link.on_connect();
        link.on_logon();
        assert_eq!(link.state(), FixState::LoggedIn);
        link.on_reject();
        assert_eq!(link.state(), FixState::LoggedIn);
    }
}

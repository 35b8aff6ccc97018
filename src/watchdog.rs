//! Health watchdog
//!
//! External liveness monitor on a dedicated low-priority thread. Consumers
//! beat the heart on every processed event; if the heart goes quiet for
//! longer than the hang threshold the watchdog fires the flatten callback
//! (close everything through the order router) and latches a termination
//! request. It is the only component allowed to unilaterally decide the
//! process is done.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::clock::Clock;

const CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Shared heartbeat + termination latch.
pub struct WatchdogState {
    last_heartbeat_ns: AtomicU64,
    flatten_triggered: AtomicBool,
    terminate_requested: AtomicBool,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self {
            last_heartbeat_ns: AtomicU64::new(0),
            flatten_triggered: AtomicBool::new(false),
            terminate_requested: AtomicBool::new(false),
        }
    }

    /// Called by consumer loops on every processed event.
    #[inline]
    pub fn heartbeat(&self, now_ns: u64) {
        self.last_heartbeat_ns.fetch_max(now_ns, Ordering::AcqRel);
    }

    #[inline]
    pub fn terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::Acquire)
    }

    pub fn flatten_triggered(&self) -> bool {
        self.flatten_triggered.load(Ordering::Acquire)
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness monitor thread.
pub struct HealthWatchdog {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HealthWatchdog {
    /// Start monitoring. `flatten` runs once, on the watchdog thread, when
    /// a hang is detected; it must be safe to call with the rest of the
    /// system wedged (it talks only to the order router).
    pub fn spawn(
        state: Arc<WatchdogState>,
        clock: Arc<dyn Clock>,
        hang_ms: u64,
        flatten: Box<dyn Fn() + Send>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        // Arm from now: a slow startup must not count as a hang.
        state.heartbeat(clock.now_ns());

        let handle = std::thread::Builder::new()
            .name("health-watchdog".to_string())
            .spawn(move || {
                info!(hang_ms, "watchdog started");
                while flag.load(Ordering::Acquire) {
                    let now = clock.now_ns();
                    let last = state.last_heartbeat_ns.load(Ordering::Acquire);
                    let quiet_ms = now.saturating_sub(last) / 1_000_000;

                    if quiet_ms > hang_ms && !state.flatten_triggered.swap(true, Ordering::AcqRel) {
                        error!(quiet_ms, hang_ms, "hang detected; flattening and requesting termination");
                        flatten();
                        state.terminate_requested.store(true, Ordering::Release);
                    }
                    std::thread::sleep(CHECK_INTERVAL);
                }
                info!("watchdog stopped");
            })
            .expect("spawn watchdog thread");

        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HealthWatchdog {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

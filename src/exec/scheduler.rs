//! Core scheduler
//!
//! One consumer thread per symbol, optionally pinned to a logical CPU.
//! Each consumer drains its symbol's lane (order events first, then
//! quotes, then trade intents), beats the watchdog heart and refreshes the
//! session context at a slow cadence. Producers (feeds, strategies, venue
//! callbacks) stay unpinned and only ever touch the lock-free lanes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam::queue::ArrayQueue;
use metrics::counter;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::exec::executor::{MarketCtx, SymbolExecutor};
use crate::exec::router::FillEvent;
use crate::feed::QuoteUpdate;
use crate::intent::Intent;
use crate::ring::IntentRing;
use crate::risk::{Session, SessionWindow};
use crate::watchdog::WatchdogState;

/// Iterations between session-context refreshes (wall-clock reads are kept
/// off the per-event path).
const CTX_REFRESH_INTERVAL: u64 = 8_192;

/// Per-symbol ingress: the intent ring plus bounded queues for quotes and
/// order lifecycle events.
pub struct SymbolLane {
    pub symbol: String,
    pub intents: IntentRing,
    pub quotes: ArrayQueue<QuoteUpdate>,
    pub order_events: ArrayQueue<FillEvent>,
}

impl SymbolLane {
    pub fn new(symbol: &str, ring_capacity: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            intents: IntentRing::with_capacity(ring_capacity),
            quotes: ArrayQueue::new(ring_capacity),
            order_events: ArrayQueue::new(ring_capacity),
        }
    }

    /// Producer-side intent push; false when the ring is full. Drops are
    /// transient rejections: counted, never propagated.
    pub fn push_intent(&self, intent: Intent) -> bool {
        let pushed = self.intents.push(intent);
        if !pushed {
            counter!("chimera.ring.dropped", 1, "symbol" => self.symbol.clone());
        }
        pushed
    }

    pub fn push_quote(&self, quote: QuoteUpdate) -> bool {
        let pushed = self.quotes.push(quote).is_ok();
        if !pushed {
            counter!("chimera.quotes.dropped", 1, "symbol" => self.symbol.clone());
        }
        pushed
    }

    pub fn push_order_event(&self, event: FillEvent) -> bool {
        self.order_events.push(event).is_ok()
    }
}

/// Session/regime context source, sampled at a slow cadence off the
/// per-event path. Production uses the wall clock; tests pin a session.
pub type MarketCtxProvider = Arc<dyn Fn() -> MarketCtx + Send + Sync>;

/// Wall-clock provider: session windows from UTC time.
pub fn wall_clock_ctx() -> MarketCtxProvider {
    Arc::new(|| {
        let now = Utc::now();
        MarketCtx {
            session: SessionWindow::from_utc(now),
            risk_session: Session::now_utc(),
            regime_allowed: true,
            chop_detected: false,
        }
    })
}

/// Fixed provider for deterministic runs.
pub fn fixed_ctx(ctx: MarketCtx) -> MarketCtxProvider {
    Arc::new(move || ctx)
}

/// Binds consumer threads to cores and runs the per-symbol loops.
pub struct CoreScheduler {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<SymbolExecutor>>,
}

impl CoreScheduler {
    /// Spawn one consumer per (executor, lane) pair. `pinning` maps symbol
    /// to logical CPU id; unmapped symbols float.
    pub fn spawn(
        lanes: Vec<(SymbolExecutor, Arc<SymbolLane>)>,
        pinning: &HashMap<String, u32>,
        watchdog: Arc<WatchdogState>,
        clock: Arc<dyn Clock>,
        ctx_provider: MarketCtxProvider,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let mut handles = Vec::with_capacity(lanes.len());

        for (mut executor, lane) in lanes {
            let running = Arc::clone(&running);
            let watchdog = Arc::clone(&watchdog);
            let clock = Arc::clone(&clock);
            let ctx_provider = Arc::clone(&ctx_provider);
            let pin = pinning.get(&lane.symbol).copied();
            let thread_name = format!("exec-{}", lane.symbol.to_lowercase());

            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    if let Some(core) = pin {
                        let pinned = core_affinity::set_for_current(core_affinity::CoreId {
                            id: core as usize,
                        });
                        if pinned {
                            info!(symbol = %lane.symbol, core, "consumer pinned");
                        } else {
                            warn!(symbol = %lane.symbol, core, "core pinning failed, floating");
                        }
                    }

                    executor.set_market_ctx(ctx_provider());
                    let mut iterations: u64 = 0;

                    while running.load(Ordering::Acquire) && !watchdog.terminate_requested() {
                        let now_ns = clock.now_ns();
                        let mut worked = false;

                        // Order lifecycle first so position state is
                        // current before new decisions.
                        while let Some(event) = lane.order_events.pop() {
                            executor.on_order_event(&event);
                            worked = true;
                        }
                        while let Some(quote) = lane.quotes.pop() {
                            executor.on_quote(&quote, quote.ts_ns);
                            worked = true;
                        }
                        while let Some(intent) = lane.intents.try_pop() {
                            executor.on_intent(&intent);
                            worked = true;
                        }

                        watchdog.heartbeat(now_ns);

                        iterations = iterations.wrapping_add(1);
                        if iterations % CTX_REFRESH_INTERVAL == 0 {
                            executor.set_market_ctx(ctx_provider());
                        }

                        if !worked {
                            std::hint::spin_loop();
                            std::thread::yield_now();
                        }
                    }

                    // Cooperative shutdown: nothing stays open overnight.
                    executor.flatten(clock.now_ns());
                    executor
                })
                .expect("spawn consumer thread");
            handles.push(handle);
        }

        Self { running, handles }
    }

    /// Request drain and join all consumers; returns the executors for
    /// final inspection (PnL, state).
    pub fn stop(self) -> Vec<SymbolExecutor> {
        self.running.store(false, Ordering::Release);
        self.handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect()
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

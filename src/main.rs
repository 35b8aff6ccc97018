//! Chimera - execution governor runtime
//!
//! Wires the service registry, spawns the pinned per-symbol consumers and
//! runs a self-contained paper session against a deterministic quote
//! generator. Live deployments replace the sim feed and router with the
//! real venue connectors behind the same interfaces.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chimera_core::capital::OrderIntent;
use chimera_core::clock::Clock;
use chimera_core::config::Config;
use chimera_core::exec::{
    wall_clock_ctx, CoreScheduler, ExecutorConfig, FillEvent, FillFanout, OrderKind, OrderRouter,
    SubmitOutcome, SymbolExecutor, SymbolLane,
};
use chimera_core::feed::{QuoteUpdate, TradeUpdate};
use chimera_core::gates::{BootstrapConfig, MicrostructureMonitor};
use chimera_core::intent::SymbolCode;
use chimera_core::journal::{EventJournal, FillRecord, SeqStore};
use chimera_core::registry::ServiceRegistry;
use chimera_core::risk::ImpulseProfile;
use chimera_core::telemetry::{LogSink, TelemetryWriter};
use chimera_core::watchdog::HealthWatchdog;

#[derive(Debug, Parser)]
#[command(name = "chimera", about = "Execution governor paper-trading runtime")]
struct Args {
    /// TOML config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session length in seconds.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Binary event journal path (overrides the config).
    #[arg(long)]
    journal: Option<PathBuf>,
}

/// Paper router: acknowledges and fully fills every order at its limit
/// price, feeding the same fanout and per-symbol event queues the live
/// connector would.
struct SimRouter {
    fanout: FillFanout,
    clock: Arc<dyn Clock>,
    lanes: Mutex<HashMap<String, Arc<SymbolLane>>>,
    journal: Option<Arc<EventJournal>>,
}

impl SimRouter {
    fn set_lanes(&self, lanes: &[Arc<SymbolLane>]) {
        let mut map = self.lanes.lock();
        for lane in lanes {
            map.insert(lane.symbol.clone(), Arc::clone(lane));
        }
    }

    fn dispatch(&self, order: &OrderIntent, event: FillEvent) {
        self.fanout.on_event(order, &event);
        if let Some(lane) = self.lanes.lock().get(order.symbol.as_str()) {
            if !lane.push_order_event(event) {
                warn!(symbol = %order.symbol, "order-event queue full, event dropped");
            }
        }
    }
}

impl OrderRouter for SimRouter {
    fn submit(&self, order: &OrderIntent, _kind: OrderKind) -> SubmitOutcome {
        let now = self.clock.now_ns();
        let fee = order.notional() * 0.00002;
        self.dispatch(
            order,
            FillEvent::Ack {
                client_id: order.client_id,
                ts_ns: now + 1_500_000, // ~1.5ms simulated ACK RTT
            },
        );
        self.dispatch(
            order,
            FillEvent::Fill {
                client_id: order.client_id,
                qty: order.qty,
                price: order.price,
                fee,
                ts_ns: now + 2_000_000,
            },
        );
        if let Some(journal) = &self.journal {
            let fill = FillRecord {
                symbol: order.symbol.as_str().to_string(),
                signed_qty: order.side.sign() * order.qty,
                price: order.price,
                fee,
            };
            if let Err(err) = journal.append_fill(now, &fill) {
                warn!(?err, "journal append failed");
            }
        }
        SubmitOutcome::Accepted
    }

    fn cancel(&self, _client_id: u64) -> SubmitOutcome {
        SubmitOutcome::Accepted
    }

    fn cancel_all(&self, symbol: &str) {
        info!(symbol, "cancel-all");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(journal) = &args.journal {
        config.journal_path = Some(journal.clone());
    }
    config.validate().context("config validation")?;

    info!(symbols = ?config.symbols, "starting chimera core");

    let registry = ServiceRegistry::build(&config);
    let clock = Arc::clone(&registry.clock);

    let journal = match &config.journal_path {
        Some(path) => Some(Arc::new(
            EventJournal::create(path).context("creating event journal")?,
        )),
        None => None,
    };

    let telemetry_writer =
        TelemetryWriter::spawn(Arc::clone(&registry.telemetry), Arc::new(LogSink));

    // FIX sequence store: the transport collaborator owns updates; the
    // core verifies the store is readable and reports resume points.
    if let Some(dir) = &config.seq_store_dir {
        let store = SeqStore::open(dir).context("opening seq store")?;
        for symbol in &config.symbols {
            let pair = store.load(symbol);
            info!(
                symbol,
                outgoing = pair.outgoing,
                expected_incoming = pair.expected_incoming,
                "fix sequence resume point"
            );
        }
    }

    // Mark the stack healthy: the sim venue is always up.
    let now = clock.now_ns();
    registry.primary_venue.mark_ws_alive(now);
    registry.secondary_venue.mark_ws_alive(now);
    registry.fix.on_connect();
    registry.fix.on_logon();
    registry.governor.update_market_state(0.1, 2.0, 2.0);

    let router = Arc::new(SimRouter {
        fanout: FillFanout {
            latency: Arc::clone(&registry.latency),
            allocator: Arc::clone(&registry.allocator),
            risk_governor: Arc::clone(&registry.governor),
            venue: Arc::clone(&registry.primary_venue),
            truth: Arc::clone(&registry.truth),
            book: Arc::clone(&registry.book),
        },
        clock: Arc::clone(&clock),
        lanes: Mutex::new(HashMap::new()),
        journal: journal.clone(),
    });

    let mut lanes = Vec::new();
    let mut pairs = Vec::new();
    for symbol in &config.symbols {
        let lane = Arc::new(SymbolLane::new(symbol, config.ring_capacity));
        let executor_config = ExecutorConfig {
            symbol: symbol.clone(),
            impulse: ImpulseProfile {
                soft: config.impulse_soft,
                medium: config.impulse_med,
                hard: config.impulse_hard,
            },
            soft_cooldown_ms: config.soft_cooldown_ms,
            hard_cooldown_ms: config.hard_cooldown_ms,
            decay_tau_ms: config.tp_decay_tau_ms,
            bootstrap: BootstrapConfig {
                min_book_valid_ms: config.bootstrap_min_book_valid_ms,
                min_tick_count: config.bootstrap_min_ticks,
                min_intents: config.bootstrap_min_intents,
                ..BootstrapConfig::default()
            },
            ..ExecutorConfig::default()
        };
        let executor = SymbolExecutor::new(
            executor_config,
            Arc::clone(&registry.gatekeeper),
            Arc::clone(&router) as Arc<dyn OrderRouter>,
            Arc::clone(&registry.client_ids),
            Some(Arc::clone(&registry.telemetry)),
        );
        lanes.push(Arc::clone(&lane));
        pairs.push((executor, lane));
    }
    router.set_lanes(&lanes);

    let scheduler = CoreScheduler::spawn(
        pairs,
        &config.core_pinning,
        Arc::clone(&registry.watchdog),
        Arc::clone(&clock),
        wall_clock_ctx(),
    );

    // Watchdog: on hang, cancel everything at the router; the consumer
    // threads flatten their own books as they exit on the terminate latch.
    let watchdog_router = Arc::clone(&router);
    let watchdog_symbols = config.symbols.clone();
    let watchdog = HealthWatchdog::spawn(
        Arc::clone(&registry.watchdog),
        Arc::clone(&clock),
        config.watchdog_hang_ms,
        Box::new(move || {
            for symbol in &watchdog_symbols {
                watchdog_router.cancel_all(symbol);
            }
        }),
    );

    // Deterministic sim feed: a slow triangle wave with periodic impulse
    // bursts that clear the entry floors.
    let feed_running = Arc::new(AtomicBool::new(true));
    let feed_flag = Arc::clone(&feed_running);
    let feed_lanes = lanes.clone();
    let feed_primary = Arc::clone(&registry.primary_venue);
    let feed_secondary = Arc::clone(&registry.secondary_venue);
    let feed_fix = Arc::clone(&registry.fix);
    let feed_latency = Arc::clone(&registry.latency);
    let feed_clock = Arc::clone(&clock);
    let feed_gate = Arc::clone(&registry.delta);
    let feed = std::thread::Builder::new()
        .name("sim-feed".to_string())
        .spawn(move || {
            let mut micro = MicrostructureMonitor::new(feed_gate);
            let mut step: u64 = 0;
            while feed_flag.load(Ordering::Acquire) {
                let now = feed_clock.now_ns();
                for (i, lane) in feed_lanes.iter().enumerate() {
                    let base = 2400.0 + i as f64 * 100.0;
                    // Impulse burst every 64 steps, slow drift back.
                    let phase = step % 64;
                    let wave = if phase < 4 {
                        (phase as f64) * 0.12
                    } else {
                        0.48 - ((phase - 4) as f64) * 0.008
                    };
                    let mid = base + wave;
                    lane.push_quote(QuoteUpdate {
                        symbol: SymbolCode::new(&lane.symbol),
                        bid: mid - 0.1,
                        ask: mid + 0.1,
                        bid_qty: 25.0,
                        ask_qty: 25.0,
                        ts_ns: now,
                    });
                }
                // Balanced tape keeps the delta gate open; the monitor is
                // the live writer the strategies read through.
                micro.on_trade(&TradeUpdate {
                    symbol: SymbolCode::new("XAUUSD"),
                    qty: 1.0,
                    is_buy: step % 2 == 0,
                    ts_ns: now,
                });
                feed_primary.mark_ws_alive(now);
                feed_secondary.mark_ws_alive(now);
                feed_fix.on_rx(now);
                feed_latency.record_rtt_ms(2.0);
                step += 1;
                std::thread::sleep(Duration::from_millis(25));
            }
        })
        .expect("spawn sim feed");

    std::thread::sleep(Duration::from_secs(args.duration_secs));

    feed_running.store(false, Ordering::Release);
    let _ = feed.join();

    let executors = scheduler.stop();
    watchdog.stop();
    telemetry_writer.stop();

    let total_pnl: f64 = executors.iter().map(|e| e.realized_pnl()).sum();
    let exposure = registry.allocator.global_exposure();
    info!(
        total_pnl,
        book_pnl = registry.book.total_realized_pnl(),
        reserved = exposure.reserved,
        committed = exposure.committed,
        telemetry_dropped = registry.telemetry.dropped(),
        "session complete"
    );

    if let Some(journal) = &journal {
        journal.close().context("closing journal")?;
        info!(path = %journal.path().display(), "journal synced");
    }

    Ok(())
}

//! Capital allocator
//!
//! Notional exposure bookkeeping across three scopes: global, per-engine
//! and per-symbol. Every update runs under one lock held for the entire
//! operation; that lock is the invariant boundary. Outside it, every slot
//! satisfies `reserved >= 0`, `committed >= 0` and
//! `reserved + committed <= cap`.
//!
//! Lifecycle per order: `reserve` (pre-submit), then either `release`
//! (cancel/reject before any fill) or fills. `commit` moves the full
//! reservation to committed on acceptance; `adjust_on_fill` reconciles
//! what actually filled, partial or complete, and must be called for every
//! fill event. The first adjust retires the original reservation wherever
//! it currently sits and books the actual fill; later adjusts for the same
//! order book only their fill. Slots therefore converge on exactly the
//! filled notional.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::intent::{Side, SymbolCode};

/// Engine attribution for exposure accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Engine {
    /// High-frequency leg.
    Hft,
    /// Structural / swing leg.
    Structure,
}

/// An intent enriched with the fields the allocator and router need:
/// client order id, engine attribution and the reference price used for
/// notional accounting.
#[derive(Debug, Clone, Copy)]
pub struct OrderIntent {
    pub client_id: u64,
    pub engine: Engine,
    pub symbol: SymbolCode,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
}

impl OrderIntent {
    #[inline]
    pub fn notional(&self) -> f64 {
        self.qty * self.price
    }
}

/// One exposure scope.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExposureSlot {
    pub committed: f64,
    pub reserved: f64,
}

impl ExposureSlot {
    #[inline]
    pub fn total(&self) -> f64 {
        self.committed + self.reserved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderPhase {
    Reserved,
    Committed,
    Adjusted,
}

struct Outstanding {
    notional: f64,
    engine: Engine,
    symbol: SymbolCode,
    phase: OrderPhase,
}

struct Inner {
    global: ExposureSlot,
    engines: HashMap<Engine, ExposureSlot>,
    symbols: HashMap<String, ExposureSlot>,
    outstanding: HashMap<u64, Outstanding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocatorSnapshot {
    pub global: ExposureSlot,
    pub engines: Vec<(Engine, ExposureSlot)>,
    pub symbols: Vec<(String, ExposureSlot)>,
}

/// Reserve/commit/adjust/release exposure ledger.
pub struct CapitalAllocator {
    global_cap: f64,
    /// Engine weights, hot-swappable from the control path.
    hft_weight: AtomicU64,
    structure_weight: AtomicU64,
    inner: Mutex<Inner>,
}

/// Per-symbol cap as a fraction of the global cap.
const SYMBOL_CAP_FRACTION: f64 = 0.5;
/// Engine weights are clamped into this band regardless of operator input.
const WEIGHT_FLOOR: f64 = 0.2;
const WEIGHT_CEIL: f64 = 0.8;

impl CapitalAllocator {
    pub fn new(global_cap: f64, hft_weight: f64, structure_weight: f64) -> Self {
        Self {
            global_cap,
            hft_weight: AtomicU64::new(hft_weight.to_bits()),
            structure_weight: AtomicU64::new(structure_weight.to_bits()),
            inner: Mutex::new(Inner {
                global: ExposureSlot::default(),
                engines: HashMap::new(),
                symbols: HashMap::new(),
                outstanding: HashMap::new(),
            }),
        }
    }

    fn weight(&self, engine: Engine) -> f64 {
        let bits = match engine {
            Engine::Hft => self.hft_weight.load(Ordering::Relaxed),
            Engine::Structure => self.structure_weight.load(Ordering::Relaxed),
        };
        f64::from_bits(bits).clamp(WEIGHT_FLOOR, WEIGHT_CEIL)
    }

    /// Hot-swap the engine split. Values are clamped on read, so a bad
    /// operator input cannot starve or flood an engine.
    pub fn update_engine_weights(&self, hft: f64, structure: f64) {
        self.hft_weight.store(hft.to_bits(), Ordering::Relaxed);
        self.structure_weight
            .store(structure.to_bits(), Ordering::Relaxed);
    }

    fn engine_cap(&self, engine: Engine) -> f64 {
        self.global_cap * self.weight(engine)
    }

    fn symbol_cap(&self) -> f64 {
        self.global_cap * SYMBOL_CAP_FRACTION
    }

    /// Try to reserve the intent's notional in all three scopes. Nothing
    /// changes unless every cap admits the addition.
    pub fn reserve(&self, intent: &OrderIntent) -> bool {
        let notional = intent.notional();
        let mut inner = self.inner.lock();

        if inner.global.total() + notional > self.global_cap {
            return false;
        }

        let engine_slot = inner.engines.entry(intent.engine).or_default();
        if engine_slot.total() + notional > self.engine_cap(intent.engine) {
            return false;
        }

        let symbol_cap = self.symbol_cap();
        let symbol_slot = inner
            .symbols
            .entry(intent.symbol.as_str().to_string())
            .or_default();
        if symbol_slot.total() + notional > symbol_cap {
            return false;
        }

        symbol_slot.reserved += notional;
        inner.engines.entry(intent.engine).or_default().reserved += notional;
        inner.global.reserved += notional;

        inner.outstanding.insert(
            intent.client_id,
            Outstanding {
                notional,
                engine: intent.engine,
                symbol: intent.symbol,
                phase: OrderPhase::Reserved,
            },
        );

        debug_assert!(self.invariants_hold(&inner));
        true
    }

    /// Move the full reservation to committed on order acceptance.
    pub fn commit(&self, intent: &OrderIntent) {
        let mut inner = self.inner.lock();
        let Some(order) = inner.outstanding.get_mut(&intent.client_id) else {
            debug!(client_id = intent.client_id, "commit for untracked order");
            return;
        };
        if order.phase != OrderPhase::Reserved {
            return;
        }
        order.phase = OrderPhase::Committed;
        let notional = order.notional;
        let engine = order.engine;
        let symbol = order.symbol;

        Self::each_slot(&mut inner, engine, &symbol, |slot| {
            slot.reserved -= notional;
            slot.committed += notional;
        });
        debug_assert!(self.invariants_hold(&inner));
    }

    /// Reconcile a fill event, partial or complete. The slot ends up
    /// holding exactly the filled notional for this order; any unfilled
    /// remainder of the original reservation is released.
    pub fn adjust_on_fill(&self, intent: &OrderIntent, actual_qty: f64, actual_price: f64) {
        let actual = actual_qty * actual_price;
        let mut inner = self.inner.lock();
        let Some(order) = inner.outstanding.get_mut(&intent.client_id) else {
            debug!(client_id = intent.client_id, "fill for untracked order");
            return;
        };
        let notional = order.notional;
        let engine = order.engine;
        let symbol = order.symbol;
        let phase = order.phase;
        order.phase = OrderPhase::Adjusted;

        match phase {
            OrderPhase::Reserved => Self::each_slot(&mut inner, engine, &symbol, |slot| {
                slot.reserved -= notional;
                slot.committed += actual;
            }),
            OrderPhase::Committed => Self::each_slot(&mut inner, engine, &symbol, |slot| {
                slot.committed -= notional;
                slot.committed += actual;
            }),
            // Follow-up fills book only their own notional.
            OrderPhase::Adjusted => Self::each_slot(&mut inner, engine, &symbol, |slot| {
                slot.committed += actual;
            }),
        }
        debug_assert!(self.invariants_hold(&inner));
    }

    /// Back out a reservation on cancel/reject before any fill.
    pub fn release(&self, intent: &OrderIntent) {
        let mut inner = self.inner.lock();
        let phase = match inner.outstanding.get(&intent.client_id) {
            None => {
                debug!(client_id = intent.client_id, "release for untracked order");
                return;
            }
            Some(order) => order.phase,
        };
        if phase != OrderPhase::Reserved {
            // Fills already reconciled this order; nothing reserved remains.
            return;
        }
        if let Some(order) = inner.outstanding.remove(&intent.client_id) {
            let notional = order.notional;
            Self::each_slot(&mut inner, order.engine, &order.symbol, |slot| {
                slot.reserved -= notional;
            });
        }
        debug_assert!(self.invariants_hold(&inner));
    }

    /// Drop the order's bookkeeping entry once its lifecycle is over
    /// (terminal fill, cancel-after-fill). Exposure is untouched.
    pub fn finalize(&self, client_id: u64) {
        self.inner.lock().outstanding.remove(&client_id);
    }

    /// Reduce committed exposure when a position is closed. The executor
    /// calls this with the entry notional of the leg being unwound.
    pub fn release_exposure(&self, engine: Engine, symbol: &str, notional: f64) {
        let mut inner = self.inner.lock();
        let code = SymbolCode::new(symbol);
        Self::each_slot(&mut inner, engine, &code, |slot| {
            slot.committed = (slot.committed - notional).max(0.0);
        });
    }

    fn each_slot(inner: &mut Inner, engine: Engine, symbol: &SymbolCode, mut f: impl FnMut(&mut ExposureSlot)) {
        f(&mut inner.global);
        f(inner.engines.entry(engine).or_default());
        f(inner.symbols.entry(symbol.as_str().to_string()).or_default());
    }

    fn invariants_hold(&self, inner: &Inner) -> bool {
        let eps = 1e-6;
        let slot_ok = |slot: &ExposureSlot, cap: f64| {
            slot.reserved >= -eps && slot.committed >= -eps && slot.total() <= cap + eps
        };
        slot_ok(&inner.global, self.global_cap)
            && inner
                .engines
                .iter()
                .all(|(e, s)| slot_ok(s, self.engine_cap(*e)))
            && inner
                .symbols
                .values()
                .all(|s| slot_ok(s, self.symbol_cap()))
    }

    // --- exposure reads (lock briefly) ---

    pub fn global_exposure(&self) -> ExposureSlot {
        self.inner.lock().global
    }

    pub fn engine_exposure(&self, engine: Engine) -> ExposureSlot {
        self.inner
            .lock()
            .engines
            .get(&engine)
            .copied()
            .unwrap_or_default()
    }

    pub fn symbol_exposure(&self, symbol: &str) -> ExposureSlot {
        self.inner
            .lock()
            .symbols
            .get(symbol)
            .copied()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> AllocatorSnapshot {
        let inner = self.inner.lock();
        AllocatorSnapshot {
            global: inner.global,
            engines: inner.engines.iter().map(|(e, s)| (*e, *s)).collect(),
            symbols: inner
                .symbols
                .iter()
                .map(|(sym, s)| (sym.clone(), *s))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn intent(client_id: u64, qty: f64, price: f64) -> OrderIntent {
        OrderIntent {
            client_id,
            engine: Engine::Hft,
            symbol: SymbolCode::new("XAUUSD"),
            side: Side::Buy,
            qty,
            price,
        }
    }

    fn allocator(cap: f64) -> CapitalAllocator {
        CapitalAllocator::new(cap, 0.6, 0.4)
    }

    fn assert_slot(slot: ExposureSlot, reserved: f64, committed: f64) {
        assert!(
            (slot.reserved - reserved).abs() < 1e-9,
            "reserved {} != {reserved}",
            slot.reserved
        );
        assert!(
            (slot.committed - committed).abs() < 1e-9,
            "committed {} != {committed}",
            slot.committed
        );
    }

    #[test]
    fn reserve_respects_global_cap() {
        let alloc = allocator(1000.0);
        assert!(alloc.reserve(&intent(1, 5.0, 100.0)));
        // 500 + 600 > 1000
        assert!(!alloc.reserve(&intent(2, 6.0, 100.0)));
        assert_slot(alloc.global_exposure(), 500.0, 0.0);
    }

    #[test]
    fn reserve_respects_engine_weight() {
        let alloc = allocator(1000.0);
        // Structure cap = 1000 * 0.4 = 400, below the symbol cap of 500.
        let mut i = intent(1, 4.5, 100.0);
        i.engine = Engine::Structure;
        assert!(!alloc.reserve(&i));

        let mut i = intent(2, 4.0, 100.0);
        i.engine = Engine::Structure;
        assert!(alloc.reserve(&i));
        assert_slot(alloc.engine_exposure(Engine::Structure), 400.0, 0.0);
    }

    #[test]
    fn reserve_respects_symbol_cap() {
        // HFT engine cap (600) sits above the symbol cap (500), so the
        // symbol gate is the one that fires.
        let alloc = allocator(1000.0);
        assert!(!alloc.reserve(&intent(1, 5.5, 100.0)));
        assert!(alloc.reserve(&intent(2, 5.0, 100.0)));
    }

    #[test]
    fn weights_clamped() {
        let alloc = CapitalAllocator::new(2000.0, 0.05, 0.95);
        // Floor 0.2: HFT still gets 400 even at weight 0.05.
        assert!(alloc.reserve(&intent(1, 2.0, 100.0)));
        assert!(!alloc.reserve(&intent(2, 3.0, 100.0)));

        // Ceiling 0.8 on structure (1600), spread over symbols so the
        // engine gate is the one that fires.
        let mut a = intent(3, 9.0, 100.0);
        a.engine = Engine::Structure;
        a.symbol = SymbolCode::new("EURUSD");
        assert!(alloc.reserve(&a));

        let mut b = intent(4, 9.0, 100.0);
        b.engine = Engine::Structure;
        b.symbol = SymbolCode::new("GBPUSD");
        assert!(!alloc.reserve(&b));
    }

    #[test]
    fn release_restores_pre_reserve_state() {
        let alloc = allocator(1000.0);
        let i = intent(1, 4.0, 100.0);
        assert!(alloc.reserve(&i));
        alloc.release(&i);
        assert_slot(alloc.global_exposure(), 0.0, 0.0);
        assert_slot(alloc.engine_exposure(Engine::Hft), 0.0, 0.0);
        assert_slot(alloc.symbol_exposure("XAUUSD"), 0.0, 0.0);
        // Full capacity available again.
        assert!(alloc.reserve(&intent(2, 5.0, 100.0)));
    }

    #[test]
    fn commit_preserves_total() {
        let alloc = allocator(1000.0);
        let i = intent(1, 4.0, 100.0);
        assert!(alloc.reserve(&i));
        alloc.commit(&i);
        assert_slot(alloc.global_exposure(), 0.0, 400.0);
        assert_eq!(alloc.global_exposure().total(), 400.0);
    }

    #[test]
    fn commit_then_full_fill_equals_commit_alone() {
        let alloc = allocator(1000.0);
        let i = intent(1, 4.0, 100.0);
        assert!(alloc.reserve(&i));
        alloc.commit(&i);
        alloc.adjust_on_fill(&i, 4.0, 100.0);
        assert_slot(alloc.global_exposure(), 0.0, 400.0);
        assert_slot(alloc.symbol_exposure("XAUUSD"), 0.0, 400.0);
    }

    #[test]
    fn partial_fill_reconciliation_scenario() {
        // Reserve q=10 p=100, commit, then three fills at q=4@101,
        // q=3@102, q=3@99. Slots must end at the filled notional 1007.
        let alloc = allocator(10_000.0);
        let i = intent(1, 10.0, 100.0);

        assert!(alloc.reserve(&i));
        assert_slot(alloc.global_exposure(), 1000.0, 0.0);

        alloc.commit(&i);
        assert_slot(alloc.global_exposure(), 0.0, 1000.0);

        alloc.adjust_on_fill(&i, 4.0, 101.0);
        assert_slot(alloc.global_exposure(), 0.0, 404.0);

        alloc.adjust_on_fill(&i, 3.0, 102.0);
        assert_slot(alloc.global_exposure(), 0.0, 404.0 + 306.0);

        alloc.adjust_on_fill(&i, 3.0, 99.0);
        assert_slot(alloc.global_exposure(), 0.0, 1007.0);
        assert_slot(alloc.engine_exposure(Engine::Hft), 0.0, 1007.0);
        assert_slot(alloc.symbol_exposure("XAUUSD"), 0.0, 1007.0);
    }

    #[test]
    fn partial_fill_without_commit() {
        // Fill arrives before the ACK-driven commit: adjust straight from
        // the reserved phase.
        let alloc = allocator(10_000.0);
        let i = intent(1, 10.0, 100.0);
        assert!(alloc.reserve(&i));

        alloc.adjust_on_fill(&i, 4.0, 101.0);
        // Reserved fully retired, committed reflects the fill only.
        assert_slot(alloc.global_exposure(), 0.0, 404.0);
    }

    #[test]
    fn release_after_fill_is_inert() {
        let alloc = allocator(10_000.0);
        let i = intent(1, 10.0, 100.0);
        assert!(alloc.reserve(&i));
        alloc.adjust_on_fill(&i, 10.0, 100.0);
        alloc.release(&i);
        assert_slot(alloc.global_exposure(), 0.0, 1000.0);
    }

    #[test]
    fn release_exposure_on_position_close() {
        let alloc = allocator(10_000.0);
        let i = intent(1, 10.0, 100.0);
        assert!(alloc.reserve(&i));
        alloc.commit(&i);
        alloc.adjust_on_fill(&i, 10.0, 100.0);
        alloc.finalize(i.client_id);

        alloc.release_exposure(Engine::Hft, "XAUUSD", 1000.0);
        assert_slot(alloc.global_exposure(), 0.0, 0.0);
        assert_slot(alloc.symbol_exposure("XAUUSD"), 0.0, 0.0);
    }

    #[test]
    fn concurrent_reserves_never_exceed_cap() {
        let alloc = Arc::new(allocator(10_000.0));
        let mut handles = Vec::new();

        for t in 0..8u64 {
            let alloc = Arc::clone(&alloc);
            handles.push(std::thread::spawn(move || {
                let mut granted = 0u32;
                for k in 0..200u64 {
                    let id = t * 1000 + k;
                    let mut i = intent(id, 1.0, 100.0);
                    // Spread across both engines and two symbols.
                    if t % 2 == 0 {
                        i.engine = Engine::Structure;
                        i.symbol = SymbolCode::new("XAGUSD");
                    }
                    if alloc.reserve(&i) {
                        granted += 1;
                        let slot = alloc.global_exposure();
                        assert!(slot.total() <= 10_000.0 + 1e-6);
                        if k % 3 == 0 {
                            alloc.release(&i);
                        } else {
                            alloc.commit(&i);
                            alloc.adjust_on_fill(&i, 1.0, 100.0);
                            alloc.finalize(id);
                        }
                    }
                }
                granted
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let slot = alloc.global_exposure();
        assert!(slot.reserved >= 0.0);
        assert!(slot.committed >= 0.0);
        assert!(slot.total() <= 10_000.0 + 1e-6);
    }
}

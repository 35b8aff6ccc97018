//! Order routing interface
//!
//! The core never talks to a wire directly: it hands orders to an
//! `OrderRouter` and receives acknowledgements, fills and rejects back as
//! `FillEvent`s on the venue callback thread. Router implementations are
//! total functions returning typed outcomes; they never panic and never
//! throw through the hot path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::capital::{CapitalAllocator, OrderIntent};
use crate::latency::LatencyGovernor;
use crate::position::PositionBook;
use crate::risk::{ExchangePosition, ExchangeTruth, RiskGovernor};
use crate::venue::VenueHealth;

/// Order type hint for the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderKind {
    Market,
    Limit,
}

/// Immediate submit outcome. Acceptance here only means the router took
/// the order; the ACK and fills arrive asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Router-side refusal (throttle, transport down). Local, transient.
    Rejected,
}

/// Asynchronous order lifecycle event from the venue.
#[derive(Debug, Clone, Copy)]
pub enum FillEvent {
    Ack {
        client_id: u64,
        ts_ns: u64,
    },
    Fill {
        client_id: u64,
        qty: f64,
        price: f64,
        fee: f64,
        ts_ns: u64,
    },
    Reject {
        client_id: u64,
        ts_ns: u64,
    },
}

/// Output port toward the exchange.
pub trait OrderRouter: Send + Sync {
    fn submit(&self, order: &OrderIntent, kind: OrderKind) -> SubmitOutcome;
    fn cancel(&self, client_id: u64) -> SubmitOutcome;
    /// Cancel everything resting for one symbol. Used by flatten paths.
    fn cancel_all(&self, symbol: &str);
}

/// Monotonically-increasing client order ids, shared by all executors.
pub struct ClientIdAllocator {
    next: AtomicU64,
}

impl ClientIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ClientIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fans fill events out to the governors that consume them: the latency
/// governor (ACK RTTs), the allocator (partial-fill reconciliation), venue
/// health, exchange truth and the position book. Realized PnL is applied
/// by the owning executor, which knows entry prices.
pub struct FillFanout {
    pub latency: Arc<LatencyGovernor>,
    pub allocator: Arc<CapitalAllocator>,
    pub risk_governor: Arc<RiskGovernor>,
    pub venue: Arc<VenueHealth>,
    pub truth: Arc<ExchangeTruth>,
    pub book: Arc<PositionBook>,
}

impl FillFanout {
    /// Apply the cross-cutting effects of a fill event. The owning
    /// executor separately applies execution-state effects (leg matching,
    /// realized PnL, cooldowns).
    pub fn on_event(&self, order: &OrderIntent, event: &FillEvent) {
        match *event {
            FillEvent::Ack { client_id, ts_ns } => {
                self.latency.on_ack(client_id, ts_ns);
                self.allocator.commit(order);
                self.venue.mark_rest_alive(ts_ns);
            }
            FillEvent::Fill {
                qty,
                price,
                fee,
                ts_ns,
                ..
            } => {
                self.allocator.adjust_on_fill(order, qty, price);
                let signed = order.side.sign() * qty;
                self.book.on_fill(order.symbol.as_str(), signed, price, fee);
                self.venue.mark_rest_alive(ts_ns);
                // Exchange truth follows the venue's own fill reports.
                self.truth.on_exchange_position(ExchangePosition {
                    symbol: order.symbol.as_str().to_string(),
                    qty: self.book.net_qty(order.symbol.as_str()),
                    entry_price: price,
                });
            }
            FillEvent::Reject { client_id, .. } => {
                self.latency.forget_submit(client_id);
                self.allocator.release(order);
                self.venue.record_reject();
                self.risk_governor.record_reject();
            }
        }
    }
}

/// In-process router double: records submissions and lets a driver script
/// fills. Used by the simulation binary and tests.
#[derive(Default)]
pub struct RecordingRouter {
    submissions: Mutex<Vec<(OrderIntent, OrderKind)>>,
    cancels: Mutex<Vec<u64>>,
    cancel_alls: Mutex<Vec<String>>,
    reject_next: AtomicU64,
}

impl RecordingRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next N submits return `Rejected`.
    pub fn reject_next(&self, n: u64) {
        self.reject_next.store(n, Ordering::Relaxed);
    }

    pub fn submissions(&self) -> Vec<(OrderIntent, OrderKind)> {
        self.submissions.lock().clone()
    }

    pub fn last_submission(&self) -> Option<(OrderIntent, OrderKind)> {
        self.submissions.lock().last().copied()
    }

    pub fn cancel_alls(&self) -> Vec<String> {
        self.cancel_alls.lock().clone()
    }

    pub fn cancels(&self) -> Vec<u64> {
        self.cancels.lock().clone()
    }
}

impl OrderRouter for RecordingRouter {
    fn submit(&self, order: &OrderIntent, kind: OrderKind) -> SubmitOutcome {
        let pending_rejects = self.reject_next.load(Ordering::Relaxed);
        if pending_rejects > 0 {
            self.reject_next.store(pending_rejects - 1, Ordering::Relaxed);
            return SubmitOutcome::Rejected;
        }
        self.submissions.lock().push((*order, kind));
        SubmitOutcome::Accepted
    }

    fn cancel(&self, client_id: u64) -> SubmitOutcome {
        self.cancels.lock().push(client_id);
        SubmitOutcome::Accepted
    }

    fn cancel_all(&self, symbol: &str) {
        self.cancel_alls.lock().push(symbol.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capital::Engine;
    use crate::intent::{Side, SymbolCode};
    use crate::latency::RegimeThresholds;

    fn order(client_id: u64) -> OrderIntent {
        OrderIntent {
            client_id,
            engine: Engine::Hft,
            symbol: SymbolCode::new("XAUUSD"),
            side: Side::Buy,
            qty: 1.0,
            price: 100.0,
        }
    }

    fn fanout() -> FillFanout {
        FillFanout {
            latency: Arc::new(LatencyGovernor::new(2048, RegimeThresholds::default())),
            allocator: Arc::new(CapitalAllocator::new(10_000.0, 0.6, 0.4)),
            risk_governor: Arc::new(RiskGovernor::new(500.0, 1.0, 5.0, 500.0)),
            venue: Arc::new(VenueHealth::new()),
            truth: Arc::new(ExchangeTruth::new()),
            book: Arc::new(PositionBook::new()),
        }
    }

    #[test]
    fn client_ids_are_monotone() {
        let ids = ClientIdAllocator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(b > a);
    }

    #[test]
    fn ack_commits_reservation() {
        let f = fanout();
        let o = order(1);
        assert!(f.allocator.reserve(&o));
        f.on_event(&o, &FillEvent::Ack {
            client_id: 1,
            ts_ns: 10,
        });
        let slot = f.allocator.global_exposure();
        assert_eq!(slot.reserved, 0.0);
        assert_eq!(slot.committed, 100.0);
    }

    #[test]
    fn fill_updates_book_and_truth() {
        let f = fanout();
        let o = order(2);
        assert!(f.allocator.reserve(&o));
        f.on_event(&o, &FillEvent::Fill {
            client_id: 2,
            qty: 1.0,
            price: 101.0,
            fee: 0.1,
            ts_ns: 20,
        });
        assert_eq!(f.book.net_qty("XAUUSD"), 1.0);
        assert_eq!(f.truth.position("XAUUSD").unwrap().qty, 1.0);
        assert!((f.allocator.global_exposure().committed - 101.0).abs() < 1e-9);
    }

    #[test]
    fn reject_releases_and_counts() {
        let f = fanout();
        let o = order(3);
        assert!(f.allocator.reserve(&o));
        f.on_event(&o, &FillEvent::Reject {
            client_id: 3,
            ts_ns: 30,
        });
        assert_eq!(f.allocator.global_exposure().reserved, 0.0);
        assert_eq!(f.venue.reject_count(), 1);
    }

    #[test]
    fn recording_router_scripts_rejects() {
        let router = RecordingRouter::new();
        router.reject_next(1);
        assert_eq!(router.submit(&order(1), OrderKind::Market), SubmitOutcome::Rejected);
        assert_eq!(router.submit(&order(2), OrderKind::Market), SubmitOutcome::Accepted);
        assert_eq!(router.submissions().len(), 1);

        router.cancel_all("XAUUSD");
        assert_eq!(router.cancel_alls(), vec!["XAUUSD".to_string()]);
    }
}

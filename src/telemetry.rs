//! Telemetry plumbing
//!
//! The hot path never performs I/O: it pushes fixed-size records into a
//! bounded lock-free ring and moves on. A dedicated writer thread drains
//! the ring into whatever sink is configured. When the ring is full the
//! record is dropped and counted; telemetry loss is always preferable to
//! execution latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use tracing::info;

use crate::intent::SymbolCode;
use crate::risk::BlockReason;

/// Fixed-size record; everything the hot path may want to report.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum TelemetryRecord {
    Blocked {
        symbol: SymbolCode,
        reason: BlockReason,
        ts_ns: u64,
    },
    Exit {
        symbol: SymbolCode,
        pnl: f64,
        reason: &'static str,
        ts_ns: u64,
    },
    Heartbeat {
        ts_ns: u64,
    },
}

/// Destination for drained records. Implementations own their I/O; they
/// run only on the writer thread.
pub trait TelemetrySink: Send + Sync {
    fn accept(&self, record: &TelemetryRecord);
}

/// Sink that emits records through `tracing`.
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn accept(&self, record: &TelemetryRecord) {
        match record {
            TelemetryRecord::Blocked { symbol, reason, ts_ns } => {
                info!(symbol = %symbol, reason = reason.as_str(), ts_ns, "intent blocked");
            }
            TelemetryRecord::Exit { symbol, pnl, reason, ts_ns } => {
                info!(symbol = %symbol, pnl, reason, ts_ns, "trade closed");
            }
            TelemetryRecord::Heartbeat { ts_ns } => {
                info!(ts_ns, "heartbeat");
            }
        }
    }
}

/// Bounded lock-free record queue between hot threads and the writer.
pub struct TelemetryRing {
    queue: ArrayQueue<TelemetryRecord>,
    dropped: AtomicU64,
}

impl TelemetryRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking push; full ring drops the record and counts it.
    #[inline]
    pub fn push(&self, record: TelemetryRecord) {
        if self.queue.push(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn pop(&self) -> Option<TelemetryRecord> {
        self.queue.pop()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Writer thread: drains the ring into the sink until stopped, then does a
/// final drain so shutdown loses nothing that was already queued.
pub struct TelemetryWriter {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryWriter {
    pub fn spawn(ring: Arc<TelemetryRing>, sink: Arc<dyn TelemetrySink>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    let mut drained = false;
                    while let Some(record) = ring.pop() {
                        sink.accept(&record);
                        drained = true;
                    }
                    if !drained {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
                while let Some(record) = ring.pop() {
                    sink.accept(&record);
                }
            })
            .expect("spawn telemetry writer");
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

impl Drop for TelemetryWriter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectingSink {
        records: Mutex<Vec<TelemetryRecord>>,
    }

    impl TelemetrySink for CollectingSink {
        fn accept(&self, record: &TelemetryRecord) {
            self.records.lock().push(*record);
        }
    }

    #[test]
    fn ring_drops_when_full() {
        let ring = TelemetryRing::with_capacity(2);
        ring.push(TelemetryRecord::Heartbeat { ts_ns: 1 });
        ring.push(TelemetryRecord::Heartbeat { ts_ns: 2 });
        ring.push(TelemetryRecord::Heartbeat { ts_ns: 3 });
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dropped(), 1);
    }

    #[test]
    fn writer_drains_to_sink() {
        let ring = Arc::new(TelemetryRing::with_capacity(64));
        let sink = Arc::new(CollectingSink {
            records: Mutex::new(Vec::new()),
        });
        let writer = TelemetryWriter::spawn(Arc::clone(&ring), Arc::clone(&sink) as _);

        for i in 0..10 {
            ring.push(TelemetryRecord::Heartbeat { ts_ns: i });
        }
        // Give the writer a few scheduling quanta.
        for _ in 0..100 {
            if sink.records.lock().len() == 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        writer.stop();
        assert_eq!(sink.records.lock().len(), 10);
        assert!(ring.is_empty());
    }

    #[test]
    fn stop_flushes_queued_records() {
        let ring = Arc::new(TelemetryRing::with_capacity(64));
        let sink = Arc::new(CollectingSink {
            records: Mutex::new(Vec::new()),
        });
        let writer = TelemetryWriter::spawn(Arc::clone(&ring), Arc::clone(&sink) as _);
        ring.push(TelemetryRecord::Heartbeat { ts_ns: 42 });
        writer.stop();
        assert_eq!(sink.records.lock().len(), 1);
    }
}

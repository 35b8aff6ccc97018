//! Persistence
//!
//! Two small durable stores, both written off the hot path:
//!
//! - `EventJournal`: append-only binary event log. Each record carries a
//!   monotonic event id, a timestamp, a kind tag and an opaque payload,
//!   framed with a CRC so torn tails are detected on replay. Replay folds
//!   fill events back into positions and cumulative PnL.
//! - `SeqStore`: per-symbol FIX sequence numbers (outgoing / expected
//!   incoming), rewritten atomically (temp file + rename) on every update
//!   so a crash never leaves a half-written sequence file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::position::PositionBook;

/// Event kinds recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Submit = 1,
    Ack = 2,
    Fill = 3,
    Reject = 4,
    GateBlock = 5,
    Control = 6,
}

impl EventKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(EventKind::Submit),
            2 => Some(EventKind::Ack),
            3 => Some(EventKind::Fill),
            4 => Some(EventKind::Reject),
            5 => Some(EventKind::GateBlock),
            6 => Some(EventKind::Control),
            _ => None,
        }
    }
}

/// Fill payload; the only kind replay interprets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub symbol: String,
    pub signed_qty: f64,
    pub price: f64,
    pub fee: f64,
}

/// One decoded journal record.
#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub event_id: u64,
    pub ts_ns: u64,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

struct JournalInner {
    writer: BufWriter<File>,
    next_event_id: u64,
}

/// Append-only binary event journal. Writers go through one mutex; the
/// journal is fed from the telemetry/fill paths, never from the tick loop.
pub struct EventJournal {
    path: PathBuf,
    inner: Mutex<JournalInner>,
}

impl EventJournal {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create journal dir {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open journal {}", path.display()))?;
        Ok(Self {
            path,
            inner: Mutex::new(JournalInner {
                writer: BufWriter::new(file),
                next_event_id: 1,
            }),
        })
    }

    /// Append one record. Framing:
    /// `event_id u64 | ts_ns u64 | kind u8 | len u32 | payload | crc32 u32`
    /// (all little-endian; CRC covers everything before it).
    pub fn append(&self, ts_ns: u64, kind: EventKind, payload: &[u8]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let event_id = inner.next_event_id;
        inner.next_event_id += 1;

        let mut frame = Vec::with_capacity(21 + payload.len() + 4);
        frame.extend_from_slice(&event_id.to_le_bytes());
        frame.extend_from_slice(&ts_ns.to_le_bytes());
        frame.push(kind as u8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&frame);
        frame.extend_from_slice(&hasher.finalize().to_le_bytes());

        inner.writer.write_all(&frame).context("journal append")?;
        Ok(event_id)
    }

    /// Convenience: append a fill event with a JSON payload.
    pub fn append_fill(&self, ts_ns: u64, fill: &FillRecord) -> Result<u64> {
        let payload = serde_json::to_vec(fill).context("encode fill record")?;
        self.append(ts_ns, EventKind::Fill, &payload)
    }

    /// Flush buffers and fsync. Called on shutdown.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush().context("journal flush")?;
        inner.writer.get_ref().sync_all().context("journal fsync")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every intact record. A truncated or corrupt tail ends the
    /// stream with a warning instead of an error: the journal is append-
    /// only, so everything before the tear is still good.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("open journal {}", path.as_ref().display()))?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).context("read journal")?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut last_event_id = 0u64;

        while offset < bytes.len() {
            if bytes.len() - offset < 25 {
                warn!(offset, "journal tail truncated mid-header");
                break;
            }
            let header = &bytes[offset..];
            let event_id = u64::from_le_bytes(header[0..8].try_into().expect("sized slice"));
            let ts_ns = u64::from_le_bytes(header[8..16].try_into().expect("sized slice"));
            let kind_byte = header[16];
            let len = u32::from_le_bytes(header[17..21].try_into().expect("sized slice")) as usize;

            let frame_len = 21 + len + 4;
            if bytes.len() - offset < frame_len {
                warn!(offset, "journal tail truncated mid-payload");
                break;
            }

            let payload = &bytes[offset + 21..offset + 21 + len];
            let stored_crc = u32::from_le_bytes(
                bytes[offset + 21 + len..offset + frame_len]
                    .try_into()
                    .expect("sized slice"),
            );
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&bytes[offset..offset + 21 + len]);
            if hasher.finalize() != stored_crc {
                warn!(offset, event_id, "journal CRC mismatch; stopping replay");
                break;
            }

            let Some(kind) = EventKind::from_u8(kind_byte) else {
                warn!(offset, kind_byte, "unknown journal kind; stopping replay");
                break;
            };
            if event_id <= last_event_id {
                bail!("journal event ids not monotonic at offset {offset}");
            }
            last_event_id = event_id;

            records.push(JournalRecord {
                event_id,
                ts_ns,
                kind,
                payload: payload.to_vec(),
            });
            offset += frame_len;
        }

        Ok(records)
    }

    /// Rebuild positions and realized PnL from the journal's fill events.
    pub fn replay_positions(path: impl AsRef<Path>) -> Result<PositionBook> {
        let book = PositionBook::new();
        for record in Self::read_all(path)? {
            if record.kind != EventKind::Fill {
                continue;
            }
            let fill: FillRecord =
                serde_json::from_slice(&record.payload).context("decode fill record")?;
            book.on_fill(&fill.symbol, fill.signed_qty, fill.price, fill.fee);
        }
        Ok(book)
    }
}

/// Per-symbol FIX sequence numbers, persisted atomically.
pub struct SeqStore {
    dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeqPair {
    pub outgoing: u32,
    pub expected_incoming: u32,
}

impl SeqStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create seq store dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, session: &str) -> PathBuf {
        self.dir.join(format!("{session}.seq"))
    }

    /// Load a session's sequence pair; fresh sessions start at 1/1.
    pub fn load(&self, session: &str) -> SeqPair {
        let path = self.path_for(session);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let mut lines = contents.lines();
                let outgoing = lines.next().and_then(|l| l.trim().parse().ok());
                let expected = lines.next().and_then(|l| l.trim().parse().ok());
                match (outgoing, expected) {
                    (Some(outgoing), Some(expected_incoming)) => SeqPair {
                        outgoing,
                        expected_incoming,
                    },
                    _ => {
                        warn!(session, "corrupt seq file, restarting at 1/1");
                        SeqPair {
                            outgoing: 1,
                            expected_incoming: 1,
                        }
                    }
                }
            }
            Err(_) => SeqPair {
                outgoing: 1,
                expected_incoming: 1,
            },
        }
    }

    /// Persist via temp file + rename: readers never observe a partial
    /// write, and a crash leaves either the old or the new file.
    pub fn store(&self, session: &str, pair: SeqPair) -> Result<()> {
        let tmp = self.dir.join(format!("{session}.seq.tmp"));
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("create temp seq file {}", tmp.display()))?;
            writeln!(file, "{}", pair.outgoing)?;
            writeln!(file, "{}", pair.expected_incoming)?;
            file.sync_all().context("sync seq file")?;
        }
        std::fs::rename(&tmp, self.path_for(session)).context("rename seq file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_replay_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.bin");

        let journal = EventJournal::create(&path).unwrap();
        journal
            .append_fill(
                10,
                &FillRecord {
                    symbol: "XAUUSD".to_string(),
                    signed_qty: 1.0,
                    price: 2400.0,
                    fee: 0.5,
                },
            )
            .unwrap();
        journal
            .append_fill(
                20,
                &FillRecord {
                    symbol: "XAUUSD".to_string(),
                    signed_qty: -1.0,
                    price: 2410.0,
                    fee: 0.5,
                },
            )
            .unwrap();
        journal.append(30, EventKind::Control, b"daily_reset").unwrap();
        journal.close().unwrap();

        let records = EventJournal::read_all(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event_id, 1);
        assert_eq!(records[2].kind, EventKind::Control);

        let book = EventJournal::replay_positions(&path).unwrap();
        assert!(book.position("XAUUSD").is_flat());
        assert!((book.total_realized_pnl() - 10.0).abs() < 1e-9);
        assert!((book.total_fees() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn event_ids_are_monotonic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.bin");
        let journal = EventJournal::create(&path).unwrap();
        let a = journal.append(1, EventKind::Submit, b"a").unwrap();
        let b = journal.append(2, EventKind::Ack, b"b").unwrap();
        assert!(b > a);
        journal.close().unwrap();
    }

    #[test]
    fn truncated_tail_is_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.bin");
        {
            let journal = EventJournal::create(&path).unwrap();
            journal.append(1, EventKind::Submit, b"first").unwrap();
            journal.append(2, EventKind::Submit, b"second").unwrap();
            journal.close().unwrap();
        }

        // Tear off the last few bytes, as a crash mid-write would.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let records = EventJournal::read_all(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"first");
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.bin");
        {
            let journal = EventJournal::create(&path).unwrap();
            journal.append(1, EventKind::Submit, b"payload").unwrap();
            journal.close().unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        // Flip one payload byte; the CRC no longer matches.
        let idx = 22;
        bytes[idx] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let records = EventJournal::read_all(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn seq_store_roundtrip_and_fresh_default() {
        let dir = tempdir().unwrap();
        let store = SeqStore::open(dir.path()).unwrap();

        let fresh = store.load("metals");
        assert_eq!(fresh, SeqPair { outgoing: 1, expected_incoming: 1 });

        store
            .store(
                "metals",
                SeqPair {
                    outgoing: 42,
                    expected_incoming: 17,
                },
            )
            .unwrap();
        let loaded = store.load("metals");
        assert_eq!(loaded.outgoing, 42);
        assert_eq!(loaded.expected_incoming, 17);

        // No temp file left behind.
        assert!(!dir.path().join("metals.seq.tmp").exists());
    }
}

//! Trade intent record
//!
//! The unit of work flowing from signal producers to the execution thread.
//! Kept `Copy` and under one cache line so the ring can move it without
//! heap traffic.

use std::fmt;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

impl Side {
    /// Signed direction: +1 for buy, -1 for sell.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Maximum symbol length (ASCII, no interior NULs).
pub const MAX_SYMBOL_LEN: usize = 15;

/// Fixed-width inline symbol. 15 ASCII bytes plus a length byte, so the
/// whole `Intent` stays within a cache line and never touches the heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolCode {
    bytes: [u8; MAX_SYMBOL_LEN],
    len: u8,
}

impl SymbolCode {
    /// Build from a string slice, truncating at 15 bytes.
    pub fn new(s: &str) -> Self {
        let mut bytes = [0u8; MAX_SYMBOL_LEN];
        let src = s.as_bytes();
        let len = src.len().min(MAX_SYMBOL_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        // Constructed only from &str prefixes, so always valid UTF-8.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl serde::Serialize for SymbolCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Debug for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SymbolCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A desired trade action before gating. Immutable after construction;
/// producer-owned until pushed onto the ring, consumer-owned after pop.
#[derive(Debug, Clone, Copy)]
pub struct Intent {
    pub side: Side,
    pub symbol: SymbolCode,
    pub qty: f64,
    pub ts_ns: u64,
}

impl Intent {
    pub fn new(side: Side, symbol: &str, qty: f64, ts_ns: u64) -> Self {
        debug_assert!(qty > 0.0, "intent qty must be positive");
        Self {
            side,
            symbol: SymbolCode::new(symbol),
            qty,
            ts_ns,
        }
    }

    /// Quantity with direction applied.
    #[inline]
    pub fn signed_qty(&self) -> f64 {
        self.side.sign() * self.qty
    }
}

// The ring hands intents across threads by value.
const _: () = assert!(std::mem::size_of::<Intent>() <= 64);

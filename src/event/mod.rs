//! Ledger events, their positions, and the cursor that tracks them.
//!
//! A position is `(block, log_index)`, ordered lexicographically, so it is
//! strictly increasing across the whole log. The cursor remembers the last
//! position consumed and answers "is this event new?".

pub mod abi;

pub use abi::{DecodedEvent, EventSchema};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic position of a log entry on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub block: u64,
    pub log_index: u64,
}

impl Position {
    pub const fn new(block: u64, log_index: u64) -> Self {
        Self { block, log_index }
    }

    /// Position past every log in `block`.
    pub const fn block_end(block: u64) -> Self {
        Self { block, log_index: u64::MAX }
    }

    pub fn is_block_end(&self) -> bool {
        self.log_index == u64::MAX
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_block_end() {
            write!(f, "{}:end", self.block)
        } else {
            write!(f, "{}:{}", self.block, self.log_index)
        }
    }
}

/// Last position successfully scanned. `None` means nothing has been
/// scanned yet and every position is new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    last: Option<Position>,
}

impl Cursor {
    pub const fn genesis() -> Self {
        Self { last: None }
    }

    pub const fn at(position: Position) -> Self {
        Self { last: Some(position) }
    }

    /// Everything up to and including `block` counts as seen.
    pub const fn after_block(block: u64) -> Self {
        Self::at(Position::block_end(block))
    }

    /// Nothing from `block` onward counts as seen.
    pub const fn before_block(block: u64) -> Self {
        match block {
            0 => Self::genesis(),
            b => Self::after_block(b - 1),
        }
    }

    pub fn last(&self) -> Option<Position> {
        self.last
    }

    pub fn admits(&self, position: &Position) -> bool {
        match self.last {
            None => true,
            Some(last) => *position > last,
        }
    }

    /// First block that may still hold unseen entries.
    pub fn next_block(&self) -> u64 {
        match self.last {
            None => 0,
            Some(last) if last.is_block_end() => last.block.saturating_add(1),
            Some(last) => last.block,
        }
    }

    /// Move forward to `position`. Never moves backwards; returns whether
    /// the cursor changed.
    pub fn advance_to(&mut self, position: Position) -> bool {
        if self.admits(&position) {
            self.last = Some(position);
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last {
            None => f.write_str("genesis"),
            Some(p) => p.fmt(f),
        }
    }
}

/// One log entry of the watched event type, as delivered by a source.
/// Decoding into named fields is left to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub position: Position,
    pub contract: String,
    pub tx_hash: Option<String>,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            contract: String::new(),
            tx_hash: None,
            topics: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = contract.into();
        self
    }

    pub fn with_tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.tx_hash = Some(hash.into());
        self
    }

    pub fn with_topics(mut self, topics: Vec<[u8; 32]>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_order_by_block_then_index() {
        assert!(Position::new(5, 3) < Position::new(7, 0));
        assert!(Position::new(7, 0) < Position::new(7, 1));
        assert!(Position::new(7, 1) < Position::block_end(7));
        assert!(Position::block_end(7) < Position::new(8, 0));
    }

    #[test]
    fn cursor_admits_strictly_after() {
        let cursor = Cursor::at(Position::new(3, 0));
        assert!(!cursor.admits(&Position::new(3, 0)));
        assert!(!cursor.admits(&Position::new(2, 9)));
        assert!(cursor.admits(&Position::new(3, 1)));
        assert!(Cursor::genesis().admits(&Position::new(0, 0)));
    }

    #[test]
    fn cursor_next_block() {
        assert_eq!(Cursor::genesis().next_block(), 0);
        assert_eq!(Cursor::after_block(10).next_block(), 11);
        assert_eq!(Cursor::at(Position::new(10, 2)).next_block(), 10);
        assert_eq!(Cursor::before_block(10).next_block(), 10);
        assert_eq!(Cursor::before_block(0), Cursor::genesis());
    }

    #[test]
    fn cursor_never_rewinds() {
        let mut cursor = Cursor::at(Position::new(7, 0));
        assert!(!cursor.advance_to(Position::new(5, 0)));
        assert_eq!(cursor.last(), Some(Position::new(7, 0)));
        assert!(cursor.advance_to(Position::block_end(9)));
        assert_eq!(cursor.to_string(), "9:end");
    }
}

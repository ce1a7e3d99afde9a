//! Event sources: "give me every watched entry after my cursor".
//!
//! # Contract
//!
//! - `poll()` returns entries strictly after the cursor, ascending by position.
//! - On success the cursor moves to at least the highest position returned.
//! - On failure the cursor does not move, so a retry sees the same entries.
//!
//! | Source | Transport | Use |
//! |--------|-----------|-----|
//! | [`JsonRpcSource`] | `eth_blockNumber` + `eth_getLogs` over HTTP | Production |
//! | [`MemorySource`] | Scripted in-process ledger | Tests, dry runs |

pub mod memory;
pub mod rpc;

pub use memory::{MemoryLedger, MemorySource};
pub use rpc::{JsonRpcSource, RpcClient, SourceOptions};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BridgeError, BridgeResult};
use crate::event::{Cursor, Event};

#[async_trait]
pub trait EventSource: Send {
    /// Fetch every new entry of the watched type. Performs network I/O.
    async fn poll(&mut self) -> BridgeResult<Vec<Event>>;

    /// Current cursor. Owned by the source; readers get a copy.
    fn cursor(&self) -> Cursor;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Where a freshly started source begins delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartMode {
    /// Chain tip at startup; nothing that happened before is replayed.
    #[default]
    Latest,
    /// Deliver from this block (inclusive).
    FromPosition(u64),
}

impl StartMode {
    /// Accepts `latest`, `from-position(N)`, `from:N`, or a bare block number.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if value == "latest" || value == "tip" {
            return Some(Self::Latest);
        }
        let number = value
            .strip_prefix("from-position(")
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| value.strip_prefix("from:"))
            .unwrap_or(&value);
        number.trim().parse().ok().map(Self::FromPosition)
    }

    /// Initial cursor given the current tip.
    pub fn initial_cursor(&self, tip: u64) -> Cursor {
        match self {
            StartMode::Latest => Cursor::after_block(tip),
            StartMode::FromPosition(block) => Cursor::before_block(*block),
        }
    }
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartMode::Latest => f.write_str("latest"),
            StartMode::FromPosition(n) => write!(f, "from-position({n})"),
        }
    }
}

impl TryFrom<String> for StartMode {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| BridgeError::config(format!("invalid start mode: {value}")))
    }
}

impl From<StartMode> for String {
    fn from(mode: StartMode) -> Self {
        mode.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Position;

    #[test]
    fn start_mode_parses() {
        assert_eq!(StartMode::parse("latest"), Some(StartMode::Latest));
        assert_eq!(StartMode::parse(" LATEST "), Some(StartMode::Latest));
        assert_eq!(StartMode::parse("from-position(120)"), Some(StartMode::FromPosition(120)));
        assert_eq!(StartMode::parse("from:7"), Some(StartMode::FromPosition(7)));
        assert_eq!(StartMode::parse("42"), Some(StartMode::FromPosition(42)));
        assert_eq!(StartMode::parse("yesterday"), None);
    }

    #[test]
    fn start_mode_roundtrips_through_serde() {
        let mode: StartMode = serde_json::from_str("\"from-position(5)\"").unwrap();
        assert_eq!(mode, StartMode::FromPosition(5));
        assert_eq!(serde_json::to_string(&mode).unwrap(), "\"from-position(5)\"");
        assert!(serde_json::from_str::<StartMode>("\"soon\"").is_err());
    }

    #[test]
    fn initial_cursor_per_mode() {
        let latest = StartMode::Latest.initial_cursor(100);
        assert!(!latest.admits(&Position::new(100, 3)));
        assert!(latest.admits(&Position::new(101, 0)));

        let replay = StartMode::FromPosition(90).initial_cursor(100);
        assert!(!replay.admits(&Position::new(89, 0)));
        assert!(replay.admits(&Position::new(90, 0)));
    }
}

//! In-process ledger. Tests push entries and inject fetch failures; the
//! source side behaves like any other [`EventSource`].

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{EventSource, StartMode};
use crate::error::{BridgeError, BridgeResult};
use crate::event::{Cursor, Event, Position};

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<Event>,
    failures_pending: u32,
    polls: u64,
}

/// Shared handle to the scripted ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, event: Event) {
        self.lock().events.push(event);
    }

    /// Append an entry at `position` carrying only `topic`.
    pub fn emit(&self, position: Position, topic: [u8; 32]) {
        self.push(Event::new(position).with_topics(vec![topic]));
    }

    /// Make the next `count` polls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_pending += count;
    }

    /// Number of polls served so far, failed ones included.
    pub fn polls(&self) -> u64 {
        self.lock().polls
    }

    /// Highest block holding an entry.
    pub fn tip(&self) -> u64 {
        self.lock().events.iter().map(|e| e.position.block).max().unwrap_or(0)
    }
}

pub struct MemorySource {
    ledger: MemoryLedger,
    cursor: Cursor,
    topic: Option<[u8; 32]>,
}

impl MemorySource {
    pub fn new(ledger: MemoryLedger, start: StartMode) -> Self {
        let empty = ledger.lock().events.is_empty();
        let cursor = match start {
            StartMode::Latest if empty => Cursor::genesis(),
            mode => mode.initial_cursor(ledger.tip()),
        };
        Self::from_cursor(ledger, cursor)
    }

    pub fn from_cursor(ledger: MemoryLedger, cursor: Cursor) -> Self {
        Self { ledger, cursor, topic: None }
    }

    /// Only deliver entries whose first topic is `topic`.
    pub fn watching(mut self, topic: [u8; 32]) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn poll(&mut self) -> BridgeResult<Vec<Event>> {
        let mut state = self.ledger.lock();
        state.polls += 1;

        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(BridgeError::transient("memory ledger: injected failure"));
        }

        let mut batch: Vec<Event> = state
            .events
            .iter()
            .filter(|e| self.cursor.admits(&e.position))
            .filter(|e| match self.topic {
                Some(topic) => e.topics.first() == Some(&topic),
                None => true,
            })
            .cloned()
            .collect();
        drop(state);

        batch.sort_by_key(|e| e.position);
        batch.dedup_by_key(|e| e.position);

        if let Some(last) = batch.last() {
            self.cursor.advance_to(last.position);
        }
        Ok(batch)
    }

    fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

//! Shared, read-mostly snapshot of what the bridge is doing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::actuator::ActuatorState;
use crate::error::BridgeError;
use crate::event::{Cursor, Position};

/// Where the loop currently is. Each suspended phase is a point where
/// shutdown is honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Fetching,
    Actuating,
    Sleeping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub kind: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&BridgeError> for StatusError {
    fn from(err: &BridgeError) -> Self {
        Self { kind: err.kind(), message: err.to_string(), at: Utc::now() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub phase: Phase,
    pub source: String,
    pub cursor: Cursor,
    pub actuator: ActuatorState,
    pub pulse_started_at: Option<DateTime<Utc>>,
    pub events_delivered: u64,
    pub pulses: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub poll_failures: u64,
    pub consecutive_poll_failures: u32,
    pub last_event: Option<Position>,
    pub last_error: Option<StatusError>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BridgeStatus {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::Starting,
            source: String::new(),
            cursor: Cursor::genesis(),
            actuator: ActuatorState::Closed,
            pulse_started_at: None,
            events_delivered: 0,
            pulses: 0,
            ignored: 0,
            malformed: 0,
            poll_failures: 0,
            consecutive_poll_failures: 0,
            last_event: None,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Cloneable handle. The scheduler writes, everyone else reads.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<BridgeStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BridgeStatus {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).phase
    }

    pub fn update(&self, f: impl FnOnce(&mut BridgeStatus)) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        f(&mut guard);
        guard.updated_at = Utc::now();
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|s| s.phase = phase);
    }

    pub fn record_error(&self, err: &BridgeError) {
        self.update(|s| s.last_error = Some(StatusError::from(err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_shares_updates() {
        let status = StatusHandle::new();
        let reader = status.clone();
        assert_eq!(reader.phase(), Phase::Starting);

        status.set_phase(Phase::Actuating);
        status.record_error(&BridgeError::transient("timeout"));

        let snap = reader.snapshot();
        assert_eq!(snap.phase, Phase::Actuating);
        assert_eq!(snap.last_error.as_ref().map(|e| e.kind), Some("transient_source"));
    }

    #[test]
    fn serializes_phase_snake_case() {
        let status = StatusHandle::new();
        status.set_phase(Phase::Sleeping);
        let value = serde_json::to_value(status.snapshot()).unwrap();
        assert_eq!(value["phase"], "sleeping");
        assert_eq!(value["actuator"], "closed");
    }
}

//! Bridge errors and the propagation policy between them.

use thiserror::Error;

use crate::event::Position;

/// Everything that can go wrong between the ledger and the door.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Fetch failed (network, RPC error, unexpected response). Retried on the
    /// next iteration; the cursor is left where it was.
    #[error("Transient source error: {0}")]
    TransientSource(String),

    /// The event source cannot be reached at all, or has been gone for too long.
    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    /// One event could not be decoded or validated. Logged and skipped.
    #[error("Malformed event at {position}: {reason}")]
    MalformedEvent { position: Position, reason: String },

    /// GPIO could not be initialized or a write failed. The physical lock
    /// state is unknown after this.
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientSource(msg.into())
    }

    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::HardwareUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed(position: Position, reason: impl Into<String>) -> Self {
        Self::MalformedEvent { position, reason: reason.into() }
    }

    /// Fatal errors stop the scheduler; the rest are contained to one poll
    /// cycle or one event.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::TransientSource(_) | BridgeError::MalformedEvent { .. } => false,
            BridgeError::SourceUnavailable(_)
            | BridgeError::HardwareUnavailable(_)
            | BridgeError::Config(_) => true,
        }
    }

    /// Short machine-friendly label used in logs and the status snapshot.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::TransientSource(_) => "transient_source",
            BridgeError::SourceUnavailable(_) => "source_unavailable",
            BridgeError::MalformedEvent { .. } => "malformed_event",
            BridgeError::HardwareUnavailable(_) => "hardware_unavailable",
            BridgeError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_follows_taxonomy() {
        assert!(!BridgeError::transient("timeout").is_fatal());
        assert!(!BridgeError::malformed(Position::new(9, 0), "bad data").is_fatal());
        assert!(BridgeError::hardware("no gpiochip").is_fatal());
        assert!(BridgeError::SourceUnavailable("refused".into()).is_fatal());
        assert!(BridgeError::config("missing endpoint").is_fatal());
    }

    #[test]
    fn malformed_message_names_position() {
        let err = BridgeError::malformed(Position::new(9, 2), "short data");
        assert_eq!(err.to_string(), "Malformed event at 9:2: short data");
        assert_eq!(err.kind(), "malformed_event");
    }
}

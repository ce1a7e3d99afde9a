//! Smartdoor: ledger access events in, GPIO lock pulses out.
//!
//! # Architecture
//!
//! ```text
//! Bridge (entry point, built from BridgeConfig)
//!   │
//!   └── Scheduler (one task: poll → handle → pulse → sleep)
//!         ├── EventSource   JsonRpcSource (eth_blockNumber / eth_getLogs)
//!         │                 MemorySource  (tests)
//!         ├── EventHandler  AccessHandler (EventSchema decode + AccessPolicy)
//!         ├── Actuator      lock + indicator over a GpioBackend
//!         │                 SysfsGpio | LogGpio | MemoryGpio
//!         └── StatusHandle  shared BridgeStatus (served on /status)
//! ```
//!
//! # Guarantees
//!
//! | Property | Where |
//! |----------|-------|
//! | Each event handled at most once, in position order | `Cursor`, `Scheduler` |
//! | Failed poll never advances the cursor | `EventSource::poll` |
//! | Lock always returns to closed | `Actuator::pulse`, `Scheduler::run` |
//! | One pulse at a time | `Scheduler` owns the `Actuator` |
//!
//! # Features
//!
//! - `server` (default) - `/health` and `/status` over axum
//!
//! # Usage
//!
//! ```ignore
//! use smartdoor::{install_signal_handlers, Bridge, BridgeConfig};
//!
//! let config = BridgeConfig::new("https://rpc.example", "0x8701B311CAd384D7DB2Fa63b6179ae942707e4a4");
//! let shutdown = install_signal_handlers();
//! let bridge = Bridge::from_config(config).await?;
//! let summary = bridge.run(&shutdown).await?;
//! ```

// =============================================================================
// Core
// =============================================================================
pub mod actuator;
pub mod error;
pub mod event;
pub mod handler;
pub mod scheduler;
pub mod source;

// =============================================================================
// Assembly and process plumbing
// =============================================================================
pub mod bridge;
pub mod logging;
pub mod runtime;
#[cfg(feature = "server")]
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================
pub use actuator::{Actuator, ActuatorOptions, ActuatorState, PinAssignments, PinNumbering};
pub use actuator::{GpioBackend, Level, LogGpio, MemoryGpio, SysfsGpio};
pub use bridge::{Bridge, BridgeConfig, GpioMode};
pub use error::{BridgeError, BridgeResult};
pub use event::{Cursor, DecodedEvent, Event, EventSchema, Position};
pub use handler::{AccessHandler, AccessPolicy, ActuationDecision, EventHandler};
pub use logging::init_logging;
pub use runtime::{install_signal_handlers, Shutdown, ShutdownSignal};
pub use scheduler::{BridgeStatus, CycleReport, Phase, RunSummary, Scheduler, SchedulerConfig, StatusHandle};
pub use source::{EventSource, JsonRpcSource, MemoryLedger, MemorySource, SourceOptions, StartMode};

#[cfg(feature = "server")]
pub use server::create_router;

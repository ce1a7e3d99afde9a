//! Scheduler: the poll → handle → actuate → sleep loop.
//!
//! # Cycle
//!
//! ```text
//! ┌──────────┐  poll   ┌──────────┐ Open ┌───────────┐
//! │ Fetching │───────► │ handler  │────► │ Actuating │ (pulse, whole duration)
//! └──────────┘         └──────────┘      └───────────┘
//!      ▲                     │ Ignore / malformed  │
//!      │                     ▼                     ▼
//!      └──────────────── Sleeping (poll_interval) ◄┘
//! ```
//!
//! Events are handled one at a time, in position order. A transient poll
//! failure skips to the sleep and leaves the source cursor where it was.
//! Malformed events and handler errors are logged and skipped. Hardware
//! failures end the loop.
//!
//! Shutdown is honoured while fetching, while a pulse is in flight and
//! while sleeping, and takes priority over starting a new cycle. A shutdown
//! triggered before `run` ends it before the first poll. The lock is
//! released on every exit path.

pub mod status;

pub use status::{BridgeStatus, Phase, StatusError, StatusHandle};

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::actuator::{Actuator, ActuatorState};
use crate::error::{BridgeError, BridgeResult};
use crate::event::{Cursor, Position};
use crate::handler::{ActuationDecision, EventHandler};
use crate::runtime::ShutdownSignal;
use crate::source::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub pulse_duration: Duration,
    /// Consecutive failed polls tolerated before giving up. `None` retries
    /// forever.
    pub max_consecutive_poll_failures: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            pulse_duration: Duration::from_millis(10_000),
            max_consecutive_poll_failures: None,
        }
    }
}

/// Outcome of one [`Scheduler::run_once`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Positions handed to the handler, in order.
    pub delivered: Vec<Position>,
    pub opened: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub poll_failed: bool,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub events: u64,
    pub pulses: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub poll_failures: u64,
    pub final_cursor: Cursor,
}

pub struct Scheduler<S, H> {
    source: S,
    handler: H,
    actuator: Actuator,
    config: SchedulerConfig,
    status: StatusHandle,
    last_delivered: Option<Position>,
    consecutive_failures: u32,
    summary: RunSummary,
}

impl<S: EventSource, H: EventHandler> Scheduler<S, H> {
    pub fn new(source: S, handler: H, actuator: Actuator, config: SchedulerConfig) -> Self {
        let status = StatusHandle::new();
        let cursor = source.cursor();
        status.update(|s| {
            s.source = source.describe();
            s.cursor = cursor;
        });

        Self {
            source,
            handler,
            actuator,
            config,
            status,
            last_delivered: None,
            consecutive_failures: 0,
            summary: RunSummary { final_cursor: cursor, ..Default::default() },
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// One fetch-and-handle pass, without the trailing sleep.
    ///
    /// `Err` only for conditions that must stop the bridge: an unusable
    /// source, a failed actuation, or too many failed polls in a row.
    pub async fn run_once(&mut self) -> BridgeResult<CycleReport> {
        let mut report = CycleReport::default();
        self.summary.cycles += 1;
        self.status.set_phase(Phase::Fetching);

        let events = match self.source.poll().await {
            Ok(events) => {
                self.consecutive_failures = 0;
                events
            }
            Err(e) if !e.is_fatal() => {
                report.poll_failed = true;
                self.on_poll_failure(&e)?;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let cursor = self.source.cursor();
        self.summary.final_cursor = cursor;
        self.status.update(|s| {
            s.cursor = cursor;
            s.consecutive_poll_failures = 0;
        });

        if !events.is_empty() {
            debug!(count = events.len(), cursor = %cursor, "Fetched events");
        }

        for event in events {
            if let Some(last) = self.last_delivered {
                if event.position <= last {
                    warn!(position = %event.position, last = %last, "Dropping repeated or out-of-order event");
                    continue;
                }
            }
            self.last_delivered = Some(event.position);
            report.delivered.push(event.position);
            self.summary.events += 1;
            self.status.update(|s| {
                s.events_delivered += 1;
                s.last_event = Some(event.position);
            });

            match self.handler.handle(&event) {
                Ok(ActuationDecision::Open) => {
                    info!(
                        position = %event.position,
                        tx = event.tx_hash.as_deref().unwrap_or("-"),
                        duration_ms = self.config.pulse_duration.as_millis() as u64,
                        "Access granted; opening lock"
                    );
                    self.actuate().await?;
                    report.opened += 1;
                }
                Ok(ActuationDecision::Ignore { reason }) => {
                    info!(position = %event.position, %reason, "Event ignored");
                    report.ignored += 1;
                    self.summary.ignored += 1;
                    self.status.update(|s| s.ignored += 1);
                }
                Err(e) => {
                    warn!(position = %event.position, error = %e, kind = e.kind(), "Skipping event");
                    report.malformed += 1;
                    self.summary.malformed += 1;
                    self.status.update(|s| s.malformed += 1);
                    self.status.record_error(&e);
                }
            }
        }

        Ok(report)
    }

    async fn actuate(&mut self) -> BridgeResult<()> {
        self.status.update(|s| {
            s.phase = Phase::Actuating;
            s.actuator = ActuatorState::Open;
            s.pulse_started_at = Some(Utc::now());
        });

        let result = self.actuator.pulse(self.config.pulse_duration).await;

        let state = self.actuator.state();
        self.status.update(|s| {
            s.actuator = state;
            s.pulse_started_at = None;
        });
        result?;

        self.summary.pulses += 1;
        self.status.update(|s| s.pulses += 1);
        info!("Lock closed");
        Ok(())
    }

    fn on_poll_failure(&mut self, err: &BridgeError) -> BridgeResult<()> {
        self.consecutive_failures += 1;
        self.summary.poll_failures += 1;
        let consecutive = self.consecutive_failures;
        self.status.update(|s| {
            s.poll_failures += 1;
            s.consecutive_poll_failures = consecutive;
        });
        self.status.record_error(err);

        warn!(
            error = %err,
            consecutive,
            cursor = %self.source.cursor(),
            "Poll failed; retrying next cycle"
        );

        match self.config.max_consecutive_poll_failures {
            Some(limit) if consecutive >= limit => Err(BridgeError::SourceUnavailable(format!(
                "{consecutive} consecutive poll failures, last: {err}"
            ))),
            _ => Ok(()),
        }
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> BridgeResult<RunSummary> {
        info!(
            source = %self.source.describe(),
            cursor = %self.source.cursor(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            pulse_duration_ms = self.config.pulse_duration.as_millis() as u64,
            "Scheduler started"
        );

        let outcome: BridgeResult<()> = loop {
            let cycle = tokio::select! {
                biased;
                _ = shutdown.recv() => break Ok(()),
                cycle = self.run_once() => cycle,
            };
            if let Err(e) = cycle {
                break Err(e);
            }

            self.status.set_phase(Phase::Sleeping);
            tokio::select! {
                biased;
                _ = shutdown.recv() => break Ok(()),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        };

        let released = self.actuator.release();
        let state = self.actuator.state();
        self.status.update(|s| {
            s.actuator = state;
            s.pulse_started_at = None;
        });

        let outcome = match (outcome, released) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                error!(error = %release_err, "Release after failure also failed");
                Err(e)
            }
        };

        match outcome {
            Ok(()) => {
                self.status.set_phase(Phase::Stopped);
                info!(
                    cycles = self.summary.cycles,
                    events = self.summary.events,
                    pulses = self.summary.pulses,
                    cursor = %self.summary.final_cursor,
                    "Scheduler stopped"
                );
                Ok(self.summary.clone())
            }
            Err(e) => {
                self.status.set_phase(Phase::Failed);
                self.status.record_error(&e);
                error!(error = %e, kind = e.kind(), "Scheduler failed");
                Err(e)
            }
        }
    }
}

impl<S, H> Scheduler<S, H>
where
    S: EventSource + 'static,
    H: EventHandler + 'static,
{
    /// Run on a background task.
    pub fn spawn(self, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<BridgeResult<RunSummary>> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorOptions, MemoryGpio, PinAssignments};
    use crate::event::Event;
    use crate::source::{MemoryLedger, MemorySource, StartMode};

    struct OpenEverything;

    impl EventHandler for OpenEverything {
        fn handle(&self, _event: &Event) -> BridgeResult<ActuationDecision> {
            Ok(ActuationDecision::Open)
        }
    }

    fn scheduler(ledger: &MemoryLedger, gpio: &MemoryGpio) -> Scheduler<MemorySource, OpenEverything> {
        let actuator = Actuator::new(gpio, PinAssignments::default(), ActuatorOptions::default()).expect("actuator");
        let source = MemorySource::from_cursor(ledger.clone(), Cursor::genesis());
        let config = SchedulerConfig { pulse_duration: Duration::from_secs(1), ..Default::default() };
        Scheduler::new(source, OpenEverything, actuator, config)
    }

    #[tokio::test(start_paused = true)]
    async fn run_once_pulses_per_event() {
        let ledger = MemoryLedger::new();
        ledger.emit(Position::new(1, 0), [0; 32]);
        ledger.emit(Position::new(2, 0), [0; 32]);
        let gpio = MemoryGpio::new();
        let mut s = scheduler(&ledger, &gpio);

        let report = s.run_once().await.expect("cycle");
        assert_eq!(report.delivered, vec![Position::new(1, 0), Position::new(2, 0)]);
        assert_eq!(report.opened, 2);
        assert_eq!(s.actuator().pulses(), 2);
        assert_eq!(s.status().snapshot().pulses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_limit_is_fatal() {
        let ledger = MemoryLedger::new();
        ledger.fail_next(5);
        let gpio = MemoryGpio::new();
        let mut s = scheduler(&ledger, &gpio);
        s.config.max_consecutive_poll_failures = Some(2);

        assert!(s.run_once().await.expect("first failure tolerated").poll_failed);
        assert!(matches!(s.run_once().await, Err(BridgeError::SourceUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_poll_resets_failure_streak() {
        let ledger = MemoryLedger::new();
        let gpio = MemoryGpio::new();
        let source = MemorySource::new(ledger.clone(), StartMode::Latest);
        let actuator = Actuator::new(&gpio, PinAssignments::default(), ActuatorOptions::default()).expect("actuator");
        let config = SchedulerConfig { max_consecutive_poll_failures: Some(2), ..Default::default() };
        let mut s = Scheduler::new(source, OpenEverything, actuator, config);

        ledger.fail_next(1);
        assert!(s.run_once().await.expect("cycle").poll_failed);
        assert!(!s.run_once().await.expect("cycle").poll_failed);
        ledger.fail_next(1);
        assert!(s.run_once().await.expect("streak restarted").poll_failed);
        assert_eq!(s.summary().poll_failures, 2);
    }
}

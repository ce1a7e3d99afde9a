//! Actuator: the lock and its indicator LED, driven together.
//!
//! # States
//!
//! ```text
//!            engage()                 release()
//!   Closed ───────────► Open ─────────────────► Closed
//!     ▲                                           │
//!     └──────────── pulse(d): engage, wait d, release
//! ```
//!
//! `pulse()` holds its caller for the whole duration. The scheduler runs it
//! on its own task, so the pulse length is the floor on how fast a second
//! authorization can be served. While a pulse is in flight the actuator
//! reports an [`ActuationSession`]; if the pulse is cancelled the outputs
//! are released before the future is gone.

pub mod gpio;

pub use gpio::{GpioBackend, Level, LogGpio, MemoryGpio, OutputPin, SysfsGpio};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorState {
    Closed,
    Open,
}

/// Which header pins drive the lock and the LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssignments {
    pub lock: u8,
    pub indicator: u8,
}

impl Default for PinAssignments {
    fn default() -> Self {
        Self { lock: 18, indicator: 17 }
    }
}

/// How pin numbers in the config are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Broadcom SoC channel numbers.
    #[default]
    Bcm,
    /// Physical positions on the 40-pin header.
    Board,
}

impl PinNumbering {
    /// BCM line for `pin`, `None` if the header position is not a GPIO.
    pub fn to_bcm(self, pin: u8) -> Option<u8> {
        match self {
            PinNumbering::Bcm => (pin <= 27).then_some(pin),
            PinNumbering::Board => BOARD_TO_BCM
                .iter()
                .find(|(board, _)| *board == pin)
                .map(|(_, bcm)| *bcm),
        }
    }
}

const BOARD_TO_BCM: &[(u8, u8)] = &[
    (3, 2), (5, 3), (7, 4), (8, 14), (10, 15), (11, 17), (12, 18), (13, 27),
    (15, 22), (16, 23), (18, 24), (19, 10), (21, 9), (22, 25), (23, 11), (24, 8),
    (26, 7), (27, 0), (28, 1), (29, 5), (31, 6), (32, 12), (33, 13), (35, 19),
    (36, 16), (37, 26), (38, 20), (40, 21),
];

/// Hardware-mode settings handed to the actuator at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorOptions {
    pub numbering: PinNumbering,
    /// Open/on is driven LOW instead of HIGH.
    pub active_low: bool,
}

/// One open-lock cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActuationSession {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub lock_line: u8,
    pub indicator_line: u8,
}

pub struct Actuator {
    lock: Box<dyn OutputPin>,
    indicator: Box<dyn OutputPin>,
    options: ActuatorOptions,
    state: ActuatorState,
    session: Option<ActuationSession>,
    pulses: u64,
}

impl Actuator {
    /// Claim both lines and drive them closed. Any failure here means the
    /// bridge must not start.
    pub fn new(backend: &dyn GpioBackend, pins: PinAssignments, options: ActuatorOptions) -> BridgeResult<Self> {
        let lock_line = options.numbering.to_bcm(pins.lock).ok_or_else(|| {
            BridgeError::hardware(format!("lock pin {} is not a GPIO line ({:?})", pins.lock, options.numbering))
        })?;
        let indicator_line = options.numbering.to_bcm(pins.indicator).ok_or_else(|| {
            BridgeError::hardware(format!(
                "indicator pin {} is not a GPIO line ({:?})",
                pins.indicator, options.numbering
            ))
        })?;
        if lock_line == indicator_line {
            return Err(BridgeError::config(format!("lock and indicator share gpio{lock_line}")));
        }

        let lock = backend.claim_output(lock_line)?;
        let indicator = backend.claim_output(indicator_line)?;

        let mut actuator = Self {
            lock,
            indicator,
            options,
            state: ActuatorState::Open,
            session: None,
            pulses: 0,
        };
        actuator.release()?;

        info!(
            backend = backend.name(),
            lock = lock_line,
            indicator = indicator_line,
            active_low = options.active_low,
            "Actuator ready (closed)"
        );
        Ok(actuator)
    }

    /// Lock open, indicator on. Idempotent.
    pub fn engage(&mut self) -> BridgeResult<()> {
        self.drive(ActuatorState::Open)
    }

    /// Lock closed, indicator off. Idempotent. Ends any session.
    pub fn release(&mut self) -> BridgeResult<()> {
        self.session = None;
        self.drive(ActuatorState::Closed)
    }

    /// Engage, hold for `duration`, release. Holds the caller for the full
    /// duration. Dropping the returned future mid-wait still releases.
    pub async fn pulse(&mut self, duration: Duration) -> BridgeResult<()> {
        let mut guard = ReleaseOnDrop { actuator: self, armed: true };
        guard.actuator.engage()?;
        guard.actuator.session = Some(ActuationSession {
            started_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            lock_line: guard.actuator.lock.line(),
            indicator_line: guard.actuator.indicator.line(),
        });

        tokio::time::sleep(duration).await;
        guard.finish()
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// A pulse is in flight.
    pub fn is_busy(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ActuationSession> {
        self.session.as_ref()
    }

    /// Completed pulses.
    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    fn level_for(&self, state: ActuatorState) -> Level {
        let level = match state {
            ActuatorState::Open => Level::High,
            ActuatorState::Closed => Level::Low,
        };
        if self.options.active_low { level.inverted() } else { level }
    }

    fn drive(&mut self, target: ActuatorState) -> BridgeResult<()> {
        let level = self.level_for(target);
        // Attempt both lines even if the first write fails.
        let lock = self.lock.write(level);
        let indicator = self.indicator.write(level);
        lock.and(indicator)?;
        self.state = target;
        Ok(())
    }
}

impl Drop for Actuator {
    fn drop(&mut self) {
        if self.state != ActuatorState::Closed {
            if let Err(e) = self.release() {
                error!(error = %e, "Failed to release lock on drop");
            }
        }
    }
}

struct ReleaseOnDrop<'a> {
    actuator: &'a mut Actuator,
    armed: bool,
}

impl ReleaseOnDrop<'_> {
    fn finish(mut self) -> BridgeResult<()> {
        self.armed = false;
        self.actuator.release()?;
        self.actuator.pulses += 1;
        Ok(())
    }
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.actuator.release() {
            Ok(()) => warn!("Pulse abandoned; lock released"),
            Err(e) => error!(error = %e, "Pulse abandoned and release failed; lock state unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actuator(gpio: &MemoryGpio) -> Actuator {
        Actuator::new(gpio, PinAssignments::default(), ActuatorOptions::default()).expect("actuator")
    }

    #[test]
    fn starts_closed() {
        let gpio = MemoryGpio::new();
        let a = actuator(&gpio);
        assert_eq!(a.state(), ActuatorState::Closed);
        assert_eq!(gpio.level(18), Some(Level::Low));
        assert_eq!(gpio.level(17), Some(Level::Low));
        assert!(!a.is_busy());
    }

    #[test]
    fn engage_and_release_are_idempotent() {
        let gpio = MemoryGpio::new();
        let mut a = actuator(&gpio);

        a.engage().unwrap();
        let once = (a.state(), gpio.level(18), gpio.level(17));
        a.engage().unwrap();
        assert_eq!(once, (a.state(), gpio.level(18), gpio.level(17)));
        assert_eq!(a.state(), ActuatorState::Open);

        a.release().unwrap();
        a.release().unwrap();
        assert_eq!(a.state(), ActuatorState::Closed);
        assert_eq!(gpio.level(18), Some(Level::Low));
    }

    #[test]
    fn active_low_inverts_levels() {
        let gpio = MemoryGpio::new();
        let options = ActuatorOptions { active_low: true, ..Default::default() };
        let mut a = Actuator::new(&gpio, PinAssignments::default(), options).expect("actuator");
        assert_eq!(gpio.level(18), Some(Level::High));
        a.engage().unwrap();
        assert_eq!(gpio.level(18), Some(Level::Low));
        assert_eq!(gpio.level(17), Some(Level::Low));
    }

    #[test]
    fn board_numbering_maps_to_bcm() {
        assert_eq!(PinNumbering::Board.to_bcm(12), Some(18));
        assert_eq!(PinNumbering::Board.to_bcm(11), Some(17));
        assert_eq!(PinNumbering::Board.to_bcm(1), None);
        assert_eq!(PinNumbering::Bcm.to_bcm(40), None);

        let gpio = MemoryGpio::new();
        let options = ActuatorOptions { numbering: PinNumbering::Board, ..Default::default() };
        Actuator::new(&gpio, PinAssignments { lock: 12, indicator: 11 }, options).expect("actuator");
        assert_eq!(gpio.level(18), Some(Level::Low));
        assert_eq!(gpio.level(17), Some(Level::Low));
    }

    #[test]
    fn unavailable_hardware_fails_construction() {
        let gpio = MemoryGpio::new();
        gpio.mark_unavailable(17);
        let err = Actuator::new(&gpio, PinAssignments::default(), ActuatorOptions::default()).err();
        assert!(matches!(err, Some(BridgeError::HardwareUnavailable(_))));

        let shared = Actuator::new(&MemoryGpio::new(), PinAssignments { lock: 4, indicator: 4 }, ActuatorOptions::default()).err();
        assert!(matches!(shared, Some(BridgeError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_brackets_duration() {
        let gpio = MemoryGpio::new();
        let mut a = actuator(&gpio);

        let started = tokio::time::Instant::now();
        a.pulse(Duration::from_secs(10)).await.expect("pulse");
        assert!(started.elapsed() >= Duration::from_secs(10));

        assert_eq!(gpio.transitions(18), vec![Level::Low, Level::High, Level::Low]);
        assert_eq!(gpio.transitions(17), vec![Level::Low, Level::High, Level::Low]);
        assert_eq!(a.state(), ActuatorState::Closed);
        assert_eq!(a.pulses(), 1);
        assert!(!a.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pulse_releases() {
        let gpio = MemoryGpio::new();
        let mut a = actuator(&gpio);

        let cut_short = tokio::time::timeout(Duration::from_secs(1), a.pulse(Duration::from_secs(10))).await;
        assert!(cut_short.is_err());
        assert_eq!(a.state(), ActuatorState::Closed);
        assert_eq!(gpio.level(18), Some(Level::Low));
        assert_eq!(gpio.level(17), Some(Level::Low));
        assert_eq!(a.pulses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_is_hardware_error() {
        let gpio = MemoryGpio::new();
        let mut a = actuator(&gpio);
        gpio.fail_writes(true);
        assert!(matches!(a.pulse(Duration::from_secs(1)).await, Err(BridgeError::HardwareUnavailable(_))));
    }
}

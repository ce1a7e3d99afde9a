//! GPIO backends: "set output pin P to HIGH/LOW".
//!
//! | Backend | Target |
//! |---------|--------|
//! | [`SysfsGpio`] | Linux `/sys/class/gpio` (Raspberry Pi and friends) |
//! | [`LogGpio`] | Hosts without GPIO; writes are logged, nothing moves |
//! | [`MemoryGpio`] | Tests; records every write |

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Low => "low",
            Level::High => "high",
        })
    }
}

/// A claimed digital output line.
pub trait OutputPin: Send {
    /// BCM line number.
    fn line(&self) -> u8;
    fn write(&mut self, level: Level) -> BridgeResult<()>;
}

pub trait GpioBackend {
    fn name(&self) -> &'static str;
    /// Claim `line` (BCM numbering) as an output. Fails fast if the line or
    /// the whole GPIO interface is unavailable.
    fn claim_output(&self, line: u8) -> BridgeResult<Box<dyn OutputPin>>;
}

// =============================================================================
// sysfs
// =============================================================================

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Kernel sysfs GPIO interface.
///
/// Claiming a line blocks the calling thread while the kernel creates the
/// line directory (up to the export wait, 500 ms by default). Call it from
/// a blocking context.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    reclaim_exported: bool,
    export_wait: Duration,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(SYSFS_GPIO_ROOT)
    }
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), reclaim_exported: true, export_wait: Duration::from_millis(500) }
    }

    /// Whether a line some other process already exported may be taken over.
    pub fn reclaim_exported(mut self, reclaim: bool) -> Self {
        self.reclaim_exported = reclaim;
        self
    }

    pub fn with_export_wait(mut self, wait: Duration) -> Self {
        self.export_wait = wait;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: u8) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn export(&self, line: u8) -> BridgeResult<PathBuf> {
        let dir = self.line_dir(line);
        if dir.exists() {
            if !self.reclaim_exported {
                return Err(BridgeError::hardware(format!("gpio{line} is already exported")));
            }
            tracing::debug!(line, "Reclaiming exported gpio line");
            return Ok(dir);
        }

        std::fs::write(self.root.join("export"), line.to_string())
            .map_err(|e| BridgeError::hardware(format!("export gpio{line} under {}: {e}", self.root.display())))?;

        // The kernel creates the line directory asynchronously; udev may
        // take a moment longer to fix permissions.
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        while !dir.exists() {
            if waited >= self.export_wait {
                return Err(BridgeError::hardware(format!("gpio{line} did not appear after export")));
            }
            std::thread::sleep(step);
            waited += step;
        }
        Ok(dir)
    }
}

impl GpioBackend for SysfsGpio {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn claim_output(&self, line: u8) -> BridgeResult<Box<dyn OutputPin>> {
        let dir = self.export(line)?;
        std::fs::write(dir.join("direction"), "out")
            .map_err(|e| BridgeError::hardware(format!("gpio{line} direction: {e}")))?;
        Ok(Box::new(SysfsPin { line, value: dir.join("value") }))
    }
}

struct SysfsPin {
    line: u8,
    value: PathBuf,
}

impl OutputPin for SysfsPin {
    fn line(&self) -> u8 {
        self.line
    }

    fn write(&mut self, level: Level) -> BridgeResult<()> {
        let raw = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        std::fs::write(&self.value, raw)
            .map_err(|e| BridgeError::hardware(format!("gpio{} write {level}: {e}", self.line)))
    }
}

// =============================================================================
// log-only
// =============================================================================

/// No-op backend for machines without GPIO. Logs every write instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogGpio;

impl GpioBackend for LogGpio {
    fn name(&self) -> &'static str {
        "log"
    }

    fn claim_output(&self, line: u8) -> BridgeResult<Box<dyn OutputPin>> {
        Ok(Box::new(LogPin { line }))
    }
}

struct LogPin {
    line: u8,
}

impl OutputPin for LogPin {
    fn line(&self) -> u8 {
        self.line
    }

    fn write(&mut self, level: Level) -> BridgeResult<()> {
        tracing::info!(line = self.line, %level, "gpio write (log backend)");
        Ok(())
    }
}

// =============================================================================
// in-memory
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    levels: HashMap<u8, Level>,
    writes: Vec<(u8, Level)>,
    unavailable: HashSet<u8>,
    fail_writes: bool,
}

/// Recording backend. Clones share state, so a test keeps one handle while
/// the actuator owns the pins.
#[derive(Debug, Clone, Default)]
pub struct MemoryGpio {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current level of `line`, `None` if never written.
    pub fn level(&self, line: u8) -> Option<Level> {
        self.lock().levels.get(&line).copied()
    }

    /// Every write in order.
    pub fn writes(&self) -> Vec<(u8, Level)> {
        self.lock().writes.clone()
    }

    /// Levels written to `line` with consecutive repeats collapsed.
    pub fn transitions(&self, line: u8) -> Vec<Level> {
        let mut out: Vec<Level> = Vec::new();
        for (l, level) in self.lock().writes.iter() {
            if *l == line && out.last() != Some(level) {
                out.push(*level);
            }
        }
        out
    }

    /// Refuse to hand out `line`.
    pub fn mark_unavailable(&self, line: u8) {
        self.lock().unavailable.insert(line);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl GpioBackend for MemoryGpio {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn claim_output(&self, line: u8) -> BridgeResult<Box<dyn OutputPin>> {
        if self.lock().unavailable.contains(&line) {
            return Err(BridgeError::hardware(format!("gpio{line} unavailable")));
        }
        Ok(Box::new(MemoryPin { line, gpio: self.clone() }))
    }
}

struct MemoryPin {
    line: u8,
    gpio: MemoryGpio,
}

impl OutputPin for MemoryPin {
    fn line(&self) -> u8 {
        self.line
    }

    fn write(&mut self, level: Level) -> BridgeResult<()> {
        let mut state = self.gpio.lock();
        if state.fail_writes {
            return Err(BridgeError::hardware(format!("gpio{} write failed", self.line)));
        }
        state.levels.insert(self.line, level);
        state.writes.push((self.line, level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sysfs_reclaims_exported_line_and_writes_value() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir(dir.path().join("gpio18")).expect("line dir");

        let gpio = SysfsGpio::new(dir.path());
        let mut pin = gpio.claim_output(18).expect("claim");
        assert_eq!(std::fs::read_to_string(dir.path().join("gpio18/direction")).unwrap(), "out");

        pin.write(Level::High).expect("write");
        assert_eq!(std::fs::read_to_string(dir.path().join("gpio18/value")).unwrap(), "1");
        pin.write(Level::Low).expect("write");
        assert_eq!(std::fs::read_to_string(dir.path().join("gpio18/value")).unwrap(), "0");
    }

    #[test]
    fn sysfs_busy_line_without_reclaim_is_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir(dir.path().join("gpio17")).expect("line dir");

        let gpio = SysfsGpio::new(dir.path()).reclaim_exported(false);
        assert!(matches!(gpio.claim_output(17), Err(BridgeError::HardwareUnavailable(_))));
    }

    #[test]
    fn sysfs_missing_interface_is_unavailable() {
        let dir = TempDir::new().expect("tempdir");
        let gpio = SysfsGpio::new(dir.path().join("no-such-gpio"));
        assert!(matches!(gpio.claim_output(4), Err(BridgeError::HardwareUnavailable(_))));
    }

    #[test]
    fn sysfs_export_times_out_when_line_never_appears() {
        let dir = TempDir::new().expect("tempdir");
        let gpio = SysfsGpio::new(dir.path()).with_export_wait(Duration::from_millis(20));
        assert!(matches!(gpio.claim_output(5), Err(BridgeError::HardwareUnavailable(_))));
        assert_eq!(std::fs::read_to_string(dir.path().join("export")).unwrap(), "5");
    }

    #[test]
    fn memory_records_transitions() {
        let gpio = MemoryGpio::new();
        let mut pin = gpio.claim_output(3).expect("claim");
        pin.write(Level::Low).unwrap();
        pin.write(Level::High).unwrap();
        pin.write(Level::High).unwrap();
        pin.write(Level::Low).unwrap();

        assert_eq!(gpio.level(3), Some(Level::Low));
        assert_eq!(gpio.writes().len(), 4);
        assert_eq!(gpio.transitions(3), vec![Level::Low, Level::High, Level::Low]);
    }
}

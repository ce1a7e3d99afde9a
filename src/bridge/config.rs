//! Bridge configuration: JSON file, `.env`, `SMARTDOOR_*` environment.
//!
//! Precedence, lowest first: built-in defaults, config file, `.env`,
//! process environment, then whatever the caller applies on top (CLI
//! flags). [`BridgeConfig::validate`] runs once before anything starts.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuator::{gpio::SYSFS_GPIO_ROOT, ActuatorOptions, PinAssignments, PinNumbering};
use crate::error::{BridgeError, BridgeResult};
use crate::event::EventSchema;
use crate::handler::{AccessPolicy, AllowListConfig};
use crate::scheduler::SchedulerConfig;
use crate::source::{SourceOptions, StartMode};

const ADDRESS_PATTERN: &str = "^0x[0-9a-fA-F]{40}$";

pub const ENV_PREFIX: &str = "SMARTDOOR_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioMode {
    /// Kernel sysfs interface.
    #[default]
    Sysfs,
    /// No hardware; writes are logged.
    Log,
}

impl GpioMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpioMode::Sysfs => "sysfs",
            GpioMode::Log => "log",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Some(GpioMode::Sysfs),
            "log" | "none" | "dry-run" => Some(GpioMode::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub source_endpoint: String,
    pub contract_address: String,
    /// ABI JSON array, or a path to a file holding one. `None` uses the
    /// bundled door-contract ABI.
    pub event_schema: Option<Value>,
    pub event_name: String,
    pub poll_interval_ms: u64,
    pub pulse_duration_ms: u64,
    pub pins: PinAssignments,
    pub numbering: PinNumbering,
    pub active_low: bool,
    pub reclaim_pins: bool,
    pub gpio: GpioMode,
    pub gpio_root: PathBuf,
    pub start: StartMode,
    pub confirmations: u64,
    pub max_block_range: u64,
    pub max_consecutive_poll_failures: Option<u32>,
    pub request_timeout_ms: u64,
    pub allow_list: Option<AllowListConfig>,
    pub status_addr: Option<SocketAddr>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source_endpoint: String::new(),
            contract_address: String::new(),
            event_schema: None,
            event_name: "newAccess".into(),
            poll_interval_ms: 2000,
            pulse_duration_ms: 10_000,
            pins: PinAssignments::default(),
            numbering: PinNumbering::default(),
            active_low: false,
            reclaim_pins: true,
            gpio: GpioMode::default(),
            gpio_root: PathBuf::from(SYSFS_GPIO_ROOT),
            start: StartMode::default(),
            confirmations: 0,
            max_block_range: 2000,
            max_consecutive_poll_failures: None,
            request_timeout_ms: 10_000,
            allow_list: None,
            status_addr: None,
        }
    }
}

impl BridgeConfig {
    pub fn new(endpoint: impl Into<String>, contract: impl Into<String>) -> Self {
        Self { source_endpoint: endpoint.into(), contract_address: contract.into(), ..Default::default() }
    }
    pub fn with_event(mut self, name: impl Into<String>) -> Self { self.event_name = name.into(); self }
    pub fn with_event_schema(mut self, abi: Value) -> Self { self.event_schema = Some(abi); self }
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self { self.poll_interval_ms = ms; self }
    pub fn with_pulse_duration_ms(mut self, ms: u64) -> Self { self.pulse_duration_ms = ms; self }
    pub fn with_pins(mut self, pins: PinAssignments) -> Self { self.pins = pins; self }
    pub fn with_gpio(mut self, mode: GpioMode) -> Self { self.gpio = mode; self }
    pub fn with_start(mut self, start: StartMode) -> Self { self.start = start; self }
    pub fn with_confirmations(mut self, n: u64) -> Self { self.confirmations = n; self }
    pub fn with_allow_list(mut self, list: AllowListConfig) -> Self { self.allow_list = Some(list); self }
    pub fn with_status_addr(mut self, addr: SocketAddr) -> Self { self.status_addr = Some(addr); self }

    /// `$XDG_CONFIG_HOME/smartdoor/config.json` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("smartdoor").join("config.json"))
    }

    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| BridgeError::config(format!("parse {}: {e}", path.display())))
    }

    /// File (explicit path, `SMARTDOOR_CONFIG`, or the default location if
    /// present), then environment overrides. Not validated.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(format!("{ENV_PREFIX}CONFIG")).ok().filter(|s| !s.is_empty()).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> BridgeResult<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply `SMARTDOOR_*` overrides read through `lookup`. Empty values
    /// are ignored.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<()> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ENDPOINT") {
            self.source_endpoint = v;
        }
        if let Some(v) = get("CONTRACT") {
            self.contract_address = v;
        }
        if let Some(v) = get("EVENT") {
            self.event_name = v;
        }
        if let Some(v) = get("ABI") {
            self.event_schema = Some(Value::String(v));
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("PULSE_DURATION_MS") {
            self.pulse_duration_ms = parse_number("PULSE_DURATION_MS", &v)?;
        }
        if let Some(v) = get("LOCK_PIN") {
            self.pins.lock = parse_number("LOCK_PIN", &v)?;
        }
        if let Some(v) = get("INDICATOR_PIN") {
            self.pins.indicator = parse_number("INDICATOR_PIN", &v)?;
        }
        if let Some(v) = get("NUMBERING") {
            self.numbering = match v.trim().to_ascii_lowercase().as_str() {
                "bcm" => PinNumbering::Bcm,
                "board" => PinNumbering::Board,
                _ => return Err(BridgeError::config(format!("{ENV_PREFIX}NUMBERING: expected bcm|board, got '{v}'"))),
            };
        }
        if let Some(v) = get("ACTIVE_LOW") {
            self.active_low = parse_bool("ACTIVE_LOW", &v)?;
        }
        if let Some(v) = get("RECLAIM_PINS") {
            self.reclaim_pins = parse_bool("RECLAIM_PINS", &v)?;
        }
        if let Some(v) = get("GPIO") {
            self.gpio = GpioMode::parse(&v)
                .ok_or_else(|| BridgeError::config(format!("{ENV_PREFIX}GPIO: expected sysfs|log, got '{v}'")))?;
        }
        if let Some(v) = get("GPIO_ROOT") {
            self.gpio_root = PathBuf::from(v);
        }
        if let Some(v) = get("START") {
            self.start = StartMode::parse(&v)
                .ok_or_else(|| BridgeError::config(format!("{ENV_PREFIX}START: invalid start mode '{v}'")))?;
        }
        if let Some(v) = get("CONFIRMATIONS") {
            self.confirmations = parse_number("CONFIRMATIONS", &v)?;
        }
        if let Some(v) = get("MAX_BLOCK_RANGE") {
            self.max_block_range = parse_number("MAX_BLOCK_RANGE", &v)?;
        }
        if let Some(v) = get("MAX_POLL_FAILURES") {
            self.max_consecutive_poll_failures = Some(parse_number("MAX_POLL_FAILURES", &v)?);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_number("REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("STATUS_ADDR") {
            self.status_addr = Some(parse_number("STATUS_ADDR", &v)?);
        }
        Ok(())
    }

    /// Check everything that can be checked without touching the network
    /// or the hardware.
    pub fn validate(&self) -> BridgeResult<()> {
        let endpoint = self.source_endpoint.trim();
        if endpoint.is_empty() {
            return Err(BridgeError::config("source_endpoint is required"));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(BridgeError::config(format!("source_endpoint must be http(s): '{endpoint}'")));
        }

        let address = Regex::new(ADDRESS_PATTERN).map_err(|e| BridgeError::config(format!("address pattern: {e}")))?;
        if !address.is_match(&self.contract_address) {
            return Err(BridgeError::config(format!(
                "contract_address must be 0x followed by 40 hex digits: '{}'",
                self.contract_address
            )));
        }

        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("pulse_duration_ms", self.pulse_duration_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("max_block_range", self.max_block_range),
        ] {
            if value == 0 {
                return Err(BridgeError::config(format!("{name} must be greater than zero")));
            }
        }
        if self.max_consecutive_poll_failures == Some(0) {
            return Err(BridgeError::config("max_consecutive_poll_failures must be at least 1 when set"));
        }

        let lock = self.numbering.to_bcm(self.pins.lock);
        let indicator = self.numbering.to_bcm(self.pins.indicator);
        match (lock, indicator) {
            (None, _) => return Err(BridgeError::config(format!("lock pin {} is not a GPIO line", self.pins.lock))),
            (_, None) => {
                return Err(BridgeError::config(format!("indicator pin {} is not a GPIO line", self.pins.indicator)))
            }
            (Some(l), Some(i)) if l == i => {
                return Err(BridgeError::config("lock and indicator pins must differ"))
            }
            _ => {}
        }

        if let Some(list) = &self.allow_list {
            if list.field.trim().is_empty() {
                return Err(BridgeError::config("allow_list.field is required"));
            }
            if let Some(bad) = list.addresses.iter().find(|a| !address.is_match(a)) {
                return Err(BridgeError::config(format!("allow_list address '{bad}' is not a valid address")));
            }
        }

        let schema = self.schema()?;
        if let Some(list) = &self.allow_list {
            if !schema.params().any(|p| p.name == list.field && p.kind == "address") {
                return Err(BridgeError::config(format!(
                    "allow_list.field '{}' is not an address parameter of {}",
                    list.field,
                    schema.signature()
                )));
            }
        }
        Ok(())
    }

    /// Resolve the watched event from the configured ABI.
    pub fn schema(&self) -> BridgeResult<EventSchema> {
        match &self.event_schema {
            None => EventSchema::door_contract(&self.event_name),
            Some(Value::String(path)) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| BridgeError::config(format!("read ABI {path}: {e}")))?;
                EventSchema::from_abi_str(&raw, &self.event_name)
            }
            Some(abi) => EventSchema::from_abi(abi, &self.event_name),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.pulse_duration_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: self.poll_interval(),
            pulse_duration: self.pulse_duration(),
            max_consecutive_poll_failures: self.max_consecutive_poll_failures,
        }
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions::new(self.source_endpoint.trim(), self.contract_address.to_ascii_lowercase())
            .with_start(self.start)
            .with_confirmations(self.confirmations)
            .with_max_block_range(self.max_block_range)
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    pub fn actuator_options(&self) -> ActuatorOptions {
        ActuatorOptions { numbering: self.numbering, active_low: self.active_low }
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::from(self.allow_list.as_ref())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> BridgeResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("{ENV_PREFIX}{name}: invalid value '{value}'")))
}

fn parse_bool(name: &str, value: &str) -> BridgeResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::config(format!("{ENV_PREFIX}{name}: expected a boolean, got '{value}'"))),
    }
}

/// Load `KEY=VALUE` lines from `path` into the process environment.
/// Variables already set win; a missing file is not an error.
pub fn load_dotenv(path: &Path) -> usize {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return 0;
    };

    let mut loaded = 0;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !key.is_empty() && !value.is_empty() && std::env::var(key).is_err() {
                std::env::set_var(key, value);
                loaded += 1;
            }
        }
    }
    loaded
}

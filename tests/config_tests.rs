//! Config Tests: file, `.env` and environment layering
//!
//! These tests touch process environment, so each holds ENV_LOCK and
//! clears the variables it set.

use once_cell::sync::Lazy;
use smartdoor::bridge::{load_dotenv, BridgeConfig, GpioMode};
use smartdoor::{BridgeError, PinAssignments, StartMode};
use std::sync::Mutex;
use tempfile::TempDir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

const CONTRACT: &str = "0x8701B311CAd384D7DB2Fa63b6179ae942707e4a4";

struct EnvVars(Vec<&'static str>);

impl EnvVars {
    fn set(pairs: &[(&'static str, &str)]) -> Self {
        for (key, value) in pairs {
            std::env::set_var(key, value);
        }
        Self(pairs.iter().map(|(k, _)| *k).collect())
    }
}

impl Drop for EnvVars {
    fn drop(&mut self) {
        for key in &self.0 {
            std::env::remove_var(key);
        }
    }
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    std::fs::write(&path, body).expect("write config");
    path
}

/// Test: environment overrides the file; untouched fields keep file values
#[test]
fn env_overrides_file() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        &format!(
            r#"{{
                "source_endpoint": "http://file-node:8545",
                "contract_address": "{CONTRACT}",
                "pulse_duration_ms": 4000,
                "pins": {{"lock": 22, "indicator": 27}},
                "gpio": "log"
            }}"#
        ),
    );
    let _vars = EnvVars::set(&[
        ("SMARTDOOR_ENDPOINT", "http://env-node:8545"),
        ("SMARTDOOR_START", "from-position(77)"),
    ]);

    let config = BridgeConfig::load(Some(&path)).expect("load");
    config.validate().expect("valid");

    assert_eq!(config.source_endpoint, "http://env-node:8545");
    assert_eq!(config.start, StartMode::FromPosition(77));
    assert_eq!(config.pulse_duration_ms, 4000);
    assert_eq!(config.pins, PinAssignments { lock: 22, indicator: 27 });
    assert_eq!(config.gpio, GpioMode::Log);
}

/// Test: SMARTDOOR_CONFIG names the file when no path is given
#[test]
fn config_path_from_env() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, r#"{"event_name": "updateGuest", "confirmations": 3}"#);
    let _vars = EnvVars::set(&[("SMARTDOOR_CONFIG", path.to_str().expect("utf8 path"))]);

    let config = BridgeConfig::load(None).expect("load");
    assert_eq!(config.event_name, "updateGuest");
    assert_eq!(config.confirmations, 3);
}

/// Test: missing explicit file and bad env values are config errors
#[test]
fn load_errors_are_config_errors() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");

    let missing = BridgeConfig::load(Some(&dir.path().join("nope.json")));
    assert!(matches!(missing, Err(BridgeError::Config(_))));

    let path = write_config(&dir, "{}");
    let _vars = EnvVars::set(&[("SMARTDOOR_GPIO", "gpiod")]);
    let err = BridgeConfig::load(Some(&path)).expect_err("unknown gpio mode");
    assert!(err.to_string().contains("SMARTDOOR_GPIO"));
    assert!(err.is_fatal());
}

/// Test: .env fills unset variables only
#[test]
fn dotenv_does_not_override_environment() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");
    let env_file = dir.path().join(".env");
    std::fs::write(
        &env_file,
        "# door\nSMARTDOOR_ENDPOINT=\"http://dotenv-node\"\nexport SMARTDOOR_CONTRACT=0xabc\n\nSMARTDOOR_EVENT=\n",
    )
    .expect("write .env");
    let _vars = EnvVars::set(&[("SMARTDOOR_CONTRACT", CONTRACT)]);

    let loaded = load_dotenv(&env_file);
    let _cleanup = EnvVars(vec!["SMARTDOOR_ENDPOINT"]);

    assert_eq!(loaded, 1);
    assert_eq!(std::env::var("SMARTDOOR_ENDPOINT").as_deref(), Ok("http://dotenv-node"));
    assert_eq!(std::env::var("SMARTDOOR_CONTRACT").as_deref(), Ok(CONTRACT));
    assert!(std::env::var("SMARTDOOR_EVENT").is_err());

    assert_eq!(load_dotenv(&dir.path().join("absent.env")), 0);
}

//! Smartdoor CLI
//!
//!   smartdoor run     → Watch the contract and pulse the lock on access events
//!   smartdoor check   → Resolve and validate config, print it with the watched topic
//!
//! Configuration comes from (lowest first) the JSON config file, `.env`,
//! `SMARTDOOR_*` environment variables and command-line flags.

use anyhow::{anyhow, bail, Context};
use serde_json::json;
use smartdoor::bridge::{load_dotenv, BridgeConfig, GpioMode};
use smartdoor::logging::init_logging;
use smartdoor::{install_signal_handlers, Bridge, StartMode};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info};

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = match ParsedArgs::parse(&args[1..]) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e:#}");
            eprintln!("Run 'smartdoor --help' for usage.");
            std::process::exit(1);
        }
    };

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("smartdoor {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("run") => cmd_run(&opts),
        Some("check") => cmd_check(&opts),
        Some(cmd) => Err(anyhow!("Unknown command: {cmd}")),
        None => {
            print_usage();
            return;
        }
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "smartdoor exited with error");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    config: Option<PathBuf>,
    endpoint: Option<String>,
    contract: Option<String>,
    event: Option<String>,
    gpio: Option<GpioMode>,
    start: Option<StartMode>,
    status_addr: Option<std::net::SocketAddr>,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        load_dotenv(Path::new(".env"));

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next().cloned().ok_or_else(|| anyhow!("{flag} needs a value"))
            };
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--config" | "-c" => opts.config = Some(PathBuf::from(value(arg.as_str())?)),
                "--endpoint" | "-e" => opts.endpoint = Some(value(arg.as_str())?),
                "--contract" | "-a" => opts.contract = Some(value(arg.as_str())?),
                "--event" => opts.event = Some(value(arg.as_str())?),
                "--gpio" => {
                    let raw = value(arg.as_str())?;
                    opts.gpio = Some(GpioMode::parse(&raw).ok_or_else(|| anyhow!("--gpio: expected log|sysfs, got '{raw}'"))?);
                }
                "--start" | "-s" => {
                    let raw = value(arg.as_str())?;
                    opts.start = Some(StartMode::parse(&raw).ok_or_else(|| anyhow!("--start: invalid start mode '{raw}'"))?);
                }
                "--status-addr" => {
                    let raw = value(arg.as_str())?;
                    opts.status_addr = Some(raw.parse().with_context(|| format!("--status-addr: '{raw}'"))?);
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => bail!("Unknown option: {arg}"),
            }
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if let Some(extra) = positional.first() {
            bail!("Unexpected argument: {extra}");
        }
        Ok(opts)
    }

    /// Config file + environment, then flags on top, validated.
    fn resolve_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::load(self.config.as_deref())?;

        if let Some(endpoint) = &self.endpoint {
            config.source_endpoint = endpoint.clone();
        }
        if let Some(contract) = &self.contract {
            config.contract_address = contract.clone();
        }
        if let Some(event) = &self.event {
            config.event_name = event.clone();
        }
        if let Some(gpio) = self.gpio {
            config.gpio = gpio;
        }
        if let Some(start) = self.start {
            config.start = start;
        }
        if let Some(addr) = self.status_addr {
            config.status_addr = Some(addr);
        }

        config.validate()?;
        Ok(config)
    }
}

fn print_usage() {
    println!(
        r#"smartdoor - Ledger-driven door lock bridge

USAGE:
    smartdoor <command> [options]

COMMANDS:
    run                     Watch the contract, pulse the lock on each access event
    check                   Print the resolved config and watched topic, then exit

OPTIONS:
    --config, -c <file>     Config file (env: SMARTDOOR_CONFIG,
                            default: ~/.config/smartdoor/config.json)
    --endpoint, -e <url>    JSON-RPC endpoint (env: SMARTDOOR_ENDPOINT)
    --contract, -a <addr>   Contract address (env: SMARTDOOR_CONTRACT)
    --event <name>          Watched event (default: newAccess, env: SMARTDOOR_EVENT)
    --gpio <mode>           sysfs|log (default: sysfs, env: SMARTDOOR_GPIO)
    --start, -s <mode>      latest|from-position(N) (default: latest, env: SMARTDOOR_START)
    --status-addr <h:p>     Serve /health and /status (env: SMARTDOOR_STATUS_ADDR)
    --help, -h              Print this help
    --version, -V           Print version

ENVIRONMENT:
    SMARTDOOR_POLL_INTERVAL_MS, SMARTDOOR_PULSE_DURATION_MS, SMARTDOOR_LOCK_PIN,
    SMARTDOOR_INDICATOR_PIN, SMARTDOOR_NUMBERING, SMARTDOOR_ACTIVE_LOW,
    SMARTDOOR_RECLAIM_PINS, SMARTDOOR_GPIO_ROOT, SMARTDOOR_CONFIRMATIONS,
    SMARTDOOR_MAX_BLOCK_RANGE, SMARTDOOR_MAX_POLL_FAILURES,
    SMARTDOOR_REQUEST_TIMEOUT_MS, SMARTDOOR_ABI
    RUST_LOG                Log filter (default: info)
    SMARTDOOR_LOG_JSON=1    JSON log lines

    A .env file in the working directory is loaded first; variables already
    set in the environment win.

EXAMPLES:
    # Dry run on a laptop
    smartdoor run --gpio log -e https://rpc-amoy.polygon.technology \
        -a 0x8701B311CAd384D7DB2Fa63b6179ae942707e4a4

    # Replay from a block, with status endpoint
    smartdoor run --start 'from-position(4200000)' --status-addr 127.0.0.1:8080

    # Inspect what would run
    smartdoor check | jq .topic
"#
    );
}

fn cmd_check(opts: &ParsedArgs) -> anyhow::Result<()> {
    let config = opts.resolve_config()?;
    let schema = config.schema()?;

    let output = json!({
        "config": config,
        "event": schema.signature(),
        "topic": schema.topic_hex(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_run(opts: &ParsedArgs) -> anyhow::Result<()> {
    let config = opts.resolve_config()?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(async {
        let shutdown = install_signal_handlers();

        info!(
            endpoint = %config.source_endpoint,
            contract = %config.contract_address,
            event = %config.event_name,
            gpio = config.gpio.as_str(),
            start = %config.start,
            "Starting smartdoor"
        );

        let mut signal = shutdown.subscribe();
        let bridge = tokio::select! {
            biased;
            _ = signal.recv() => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
            bridge = Bridge::from_config(config) => bridge.context("Startup failed")?,
        };
        let summary = bridge.run(&shutdown).await.context("Bridge stopped with error")?;

        info!(
            events = summary.events,
            pulses = summary.pulses,
            cursor = %summary.final_cursor,
            "Smartdoor stopped"
        );
        Ok(())
    })
}

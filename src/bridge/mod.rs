//! Bridge: wires config into source, handler, actuator and scheduler.
//!
//! All fatal setup errors surface from [`Bridge::from_config`]: invalid
//! config, unusable GPIO, unreachable ledger node. Once built, [`Bridge::run`]
//! drives the loop (and the status endpoint, if configured) until shutdown.

pub mod config;

pub use config::{load_dotenv, BridgeConfig, GpioMode};

use tracing::info;

use crate::actuator::{Actuator, GpioBackend, LogGpio, SysfsGpio};
use crate::error::{BridgeError, BridgeResult};
use crate::handler::AccessHandler;
use crate::runtime::Shutdown;
use crate::scheduler::{RunSummary, Scheduler, StatusHandle};
use crate::source::JsonRpcSource;

pub struct Bridge {
    config: BridgeConfig,
    scheduler: Scheduler<JsonRpcSource, AccessHandler>,
}

impl Bridge {
    /// Build everything from `config`, using the GPIO backend it names.
    pub async fn from_config(config: BridgeConfig) -> BridgeResult<Self> {
        match config.gpio {
            GpioMode::Sysfs => {
                config.validate()?;
                let backend = SysfsGpio::new(&config.gpio_root).reclaim_exported(config.reclaim_pins);
                let (pins, options) = (config.pins, config.actuator_options());
                // Exporting waits on the kernel; keep it off the async workers.
                let actuator = tokio::task::spawn_blocking(move || Actuator::new(&backend, pins, options))
                    .await
                    .map_err(|e| BridgeError::hardware(format!("gpio claim task: {e}")))??;
                Self::with_actuator(config, actuator, "sysfs").await
            }
            GpioMode::Log => Self::with_backend(config, &LogGpio).await,
        }
    }

    /// Build with an explicit GPIO backend. Hardware is claimed (and driven
    /// closed) before the ledger node is contacted. The backend's claim runs
    /// on the calling task.
    pub async fn with_backend(config: BridgeConfig, backend: &dyn GpioBackend) -> BridgeResult<Self> {
        config.validate()?;
        let actuator = Actuator::new(backend, config.pins, config.actuator_options())?;
        Self::with_actuator(config, actuator, backend.name()).await
    }

    async fn with_actuator(config: BridgeConfig, actuator: Actuator, gpio: &'static str) -> BridgeResult<Self> {
        let schema = config.schema()?;
        let source = JsonRpcSource::connect(config.source_options(), &schema).await?;
        let handler = AccessHandler::new(schema).with_policy(config.access_policy());
        let scheduler = Scheduler::new(source, handler, actuator, config.scheduler_config());

        info!(
            gpio,
            event = %config.event_name,
            status_addr = ?config.status_addr,
            "Bridge assembled"
        );
        Ok(Self { config, scheduler })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn status(&self) -> StatusHandle {
        self.scheduler.status()
    }

    /// Run until `shutdown` fires or the scheduler fails. Triggers
    /// `shutdown` on the way out so the status endpoint stops with it.
    pub async fn run(self, shutdown: &Shutdown) -> BridgeResult<RunSummary> {
        #[cfg(feature = "server")]
        let server = match self.config.status_addr {
            Some(addr) => {
                let router = crate::server::create_router(self.status());
                Some(crate::server::spawn(addr, router, shutdown.subscribe()).await?)
            }
            None => None,
        };

        let result = self.scheduler.run(shutdown.subscribe()).await;
        shutdown.trigger().await;

        #[cfg(feature = "server")]
        {
            if let Some(handle) = server {
                let _ = handle.await;
                info!("Status endpoint stopped");
            }
        }

        result
    }
}

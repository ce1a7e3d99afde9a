//! Runtime - Graceful shutdown and signal handling

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal broadcaster.
///
/// Level-triggered: a receiver subscribed after [`Shutdown::trigger`] still
/// sees the shutdown.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal { receiver: self.sender.subscribe() }
    }

    /// Trigger shutdown. Only the first call notifies.
    pub async fn trigger(&self) {
        self.sender.send_if_modified(|triggered| !std::mem::replace(triggered, true));
    }

    /// Check if shutdown was triggered
    pub async fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been triggered, immediately if it already
    /// was. A dropped [`Shutdown`] counts as triggered.
    pub async fn recv(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Install SIGINT/SIGTERM handlers and return the shutdown handle.
///
/// If the handlers cannot be registered the error is logged and the
/// process falls back to Ctrl+C only.
pub fn install_signal_handlers() -> Shutdown {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        handle.trigger().await;
    });

    shutdown
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Signal handlers unavailable; waiting for Ctrl+C");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => {
            tracing::error!(error = %e, "Ctrl+C handler failed; shutdown only via fatal error");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_notifies_once() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert!(!shutdown.is_triggered().await);
        assert!(!rx.is_triggered());

        shutdown.trigger().await;
        shutdown.trigger().await;

        assert!(shutdown.is_triggered().await);
        rx.recv().await;
        rx.recv().await;
        assert!(rx.is_triggered());
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger().await;

        let mut rx = shutdown.subscribe();
        assert!(rx.is_triggered());
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("already triggered");
    }

    #[tokio::test]
    async fn pending_until_triggered() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(waiting.is_err());

        let trigger = shutdown.clone();
        tokio::spawn(async move { trigger.trigger().await });
        rx.recv().await;
    }
}

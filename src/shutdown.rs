//! Graceful shutdown handling

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown coordinator.
///
/// Level-triggered: a notifier subscribed after shutdown still observes it.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Coordinator that has not been shut down yet
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a shutdown notifier
    pub fn subscribe(&self) -> ShutdownNotifier {
        ShutdownNotifier {
            receiver: self.sender.subscribe(),
        }
    }

    /// Wait for Ctrl+C or SIGTERM, then notify all subscribers
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
        }

        self.shutdown();
    }

    /// Trigger shutdown manually. Idempotent.
    pub fn shutdown(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown triggered");
        }
    }

    /// Whether shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shutdown notifier for components
#[derive(Clone)]
pub struct ShutdownNotifier {
    receiver: watch::Receiver<bool>,
}

impl ShutdownNotifier {
    /// Resolves once shutdown is signaled or the coordinator is dropped
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Check if shutdown has been signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

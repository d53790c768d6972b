//! Graceful shutdown handling
//!
//! Shutdown coordination for the emulator runner: OS signal listening and a
//! bounded cleanup phase.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown signal that can be cloned and shared across tasks
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("🛑 Shutdown signal triggered");
            self.token.cancel();
        }
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Child token cancelled together with this signal.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Listen for OS shutdown signals (SIGTERM, SIGINT)
pub async fn listen_for_shutdown_signals(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        shutdown.trigger();
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("📡 Received SIGTERM signal"),
            _ = sigint.recv() => info!("📡 Received SIGINT signal (Ctrl+C)"),
        }

        shutdown.trigger();
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("📡 Received Ctrl+C signal"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
        shutdown.trigger();
    }
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            signal: ShutdownSignal::new(),
            grace,
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn start_signal_listener(&self) {
        let signal = self.signal.clone();
        tokio::spawn(listen_for_shutdown_signals(signal));
    }

    /// Wait for the signal, then run `cleanup` bounded by the grace period.
    ///
    /// Returns `false` when cleanup did not finish in time.
    pub async fn shutdown_with_cleanup<F, Fut>(&self, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.signal.wait().await;
        info!(grace_secs = self.grace.as_secs(), "⏳ Starting graceful shutdown");

        match tokio::time::timeout(self.grace, cleanup()).await {
            Ok(()) => {
                info!("✅ Graceful shutdown completed");
                true
            }
            Err(_) => {
                warn!(grace_secs = self.grace.as_secs(), "⚠️ Graceful shutdown timed out");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_releases_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        signal.trigger();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter not released")
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn child_token_follows_signal() {
        let signal = ShutdownSignal::new();
        let child = signal.child_token();
        assert!(!child.is_cancelled());
        signal.trigger();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cleanup_timeout_is_reported() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(20));
        coordinator.signal().trigger();
        let finished = coordinator
            .shutdown_with_cleanup(|| tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(!finished);
    }

    #[tokio::test]
    async fn cleanup_within_grace_succeeds() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.signal().trigger();
        assert!(coordinator.shutdown_with_cleanup(|| async {}).await);
    }
}

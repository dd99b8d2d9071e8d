//! SIGTERM/SIGINT handling for graceful shutdown.
//!
//! A single [`CancellationToken`] fans out to the HTTP server and every
//! background sweeper; the first signal cancels it.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct Shutdown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Shutdown {
    /// Registers the signal listeners. Fails only if signal registration
    /// itself fails, which is fatal at startup.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let armed = token.clone();
        let tracker = TaskTracker::new();
        tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            armed.cancel();
        });
        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Token to hand to the server and background workers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits until a signal arrived and the listener task finished.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

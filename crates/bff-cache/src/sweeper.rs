use crate::store::ResponseStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic purge of stale entries.
///
/// The task runs until [`Sweeper::shutdown`] is called, the token passed to
/// [`Sweeper::start_with_token`] is cancelled, or the `Sweeper` is dropped.
pub struct Sweeper {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(store: Arc<ResponseStore>, interval: Duration) -> Self {
        Self::start_with_token(store, interval, CancellationToken::new())
    }

    /// Spawn the sweep loop, stopping when `token` is cancelled.
    pub fn start_with_token(
        store: Arc<ResponseStore>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; there is nothing to sweep yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        tracing::debug!(removed, remaining = store.len(), "cache sweep");
                    }
                }
            }
            tracing::debug!("cache sweeper stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "cache sweeper started");

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache sweeper task failed");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

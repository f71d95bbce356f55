use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Collapses bursts of [`Debouncer::trigger`] calls into one trailing callback
/// once `quiet` has passed without another trigger.
///
/// Must be created inside a tokio runtime. Dropping the debouncer cancels any
/// pending call.
pub struct Debouncer {
    tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl Debouncer {
    pub fn new<F>(quiet: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(worker(rx, quiet, Arc::new(callback), cancel.clone()));
        Self { tx, cancel }
    }

    pub fn trigger(&self) {
        // Fails only after cancellation, when the worker is gone.
        let _ = self.tx.send(());
    }

    /// Drops any pending call and stops the worker. Later triggers are ignored.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<()>,
    quiet: Duration,
    callback: Arc<dyn Fn() + Send + Sync>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            msg = rx.recv() => if msg.is_none() { return },
        }
        // Burst in progress: every trigger restarts the quiet period.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                msg = rx.recv() => if msg.is_none() { return },
                _ = tokio::time::sleep(quiet) => break,
            }
        }
        callback();
    }
}

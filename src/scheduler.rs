//! Periodic tasks with an explicit cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Cancels every task holding a receiver of the same token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once `rx` reads `true` (or the token is gone).
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // wait_for errors only when the sender is dropped, which also means stop
    let _ = rx.wait_for(|c| *c).await;
}

pub struct PeriodicTask {
    name: String,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` every `period` until the token is cancelled.
    ///
    /// A slow tick delays the next one instead of queueing a burst.
    pub fn spawn<F, Fut>(name: &str, period: Duration, token: &CancelToken, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut cancel = token.subscribe();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel) => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!("Task '{}' stopped", task_name);
        });
        Self { name: name.to_string(), handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit after cancellation.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation: stages poll the running flag between chunks, so
/// an in-flight chunk always commits (or checkpoints) before exit.
pub fn new() -> (ShutdownSender, ShutdownReceiver) {
    let (sender, receiver) = watch::channel(false);
    let running = Arc::new(AtomicBool::new(true));
    (
        ShutdownSender {
            sender,
            running: running.clone(),
        },
        ShutdownReceiver { receiver, running },
    )
}

#[derive(Debug)]
pub struct ShutdownSender {
    sender: watch::Sender<bool>,
    running: Arc<AtomicBool>,
}

impl ShutdownSender {
    pub fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.sender.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownReceiver {
    receiver: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
}

impl ShutdownReceiver {
    /// Never-cancelled receiver, for tests and one-shot stages.
    pub fn never() -> Self {
        new().1
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Resolves when shutdown is requested.
    pub fn create_shutdown_future(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.receiver.clone();
        async move {
            loop {
                if *receiver.borrow() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    // Sender dropped without signalling; treat as running
                    // forever.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_flips_flag_and_resolves_future() {
        let (sender, receiver) = new();
        assert!(receiver.is_running());
        let future = receiver.create_shutdown_future();
        sender.shutdown();
        assert!(!receiver.is_running());
        future.await;
    }
}

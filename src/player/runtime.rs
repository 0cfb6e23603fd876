use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{LoadToken, PlayerEvent};

pub(crate) type Job = Box<dyn FnOnce() -> PlayerEvent + Send + 'static>;

pub(crate) trait Executor {
    fn spawn(&self, job: Job);
    fn spawn_after(&self, delay: Duration, job: Job);
    fn ticker(&self, period: Duration, token: LoadToken) -> TickerGuard;
}

pub(crate) struct TickerGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl TickerGuard {
    pub(crate) fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }
}

impl std::fmt::Debug for TickerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ThreadExecutor {
    tx: mpsc::Sender<PlayerEvent>,
}

impl ThreadExecutor {
    pub(crate) fn new(tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self { tx }
    }
}

impl Executor for ThreadExecutor {
    fn spawn(&self, job: Job) {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }

    fn spawn_after(&self, delay: Duration, job: Job) {
        let tx = self.tx.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = tx.send(job());
        });
    }

    fn ticker(&self, period: Duration, token: LoadToken) -> TickerGuard {
        let tx = self.tx.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if tx.send(PlayerEvent::CheckpointTick { token }).is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        });
        TickerGuard::new(move || {
            let _ = stop_tx.send(());
            let _ = handle.join();
            debug!(%token, "checkpoint ticker stopped");
        })
    }
}

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Sleep};

/// Owning side of a teardown signal. Dropping it tears down as well, so a
/// task can never outlive the handle that spawned it.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_pair() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_if_modified(|fired| {
            let changed = !*fired;
            *fired = true;
            changed
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Drop for ShutdownTrigger {
    fn drop(&mut self) {
        self.trigger();
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once teardown was requested. Cancel-safe.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}

/// Single-shot timer that can be armed, cancelled and awaited from inside a
/// `select!` loop. At most one expiry is pending at any time.
#[derive(Debug, Default)]
pub struct OneShotTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl OneShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer. Returns `false` and leaves the pending expiry
    /// untouched when already armed.
    pub fn arm(&mut self, delay: Duration) -> bool {
        if self.sleep.is_some() {
            return false;
        }
        self.sleep = Some(Box::pin(sleep(delay)));
        true
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Completes when the armed delay elapses; never completes while
    /// disarmed.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.await;
                self.sleep = None;
            }
            None => pending::<()>().await,
        }
    }
}

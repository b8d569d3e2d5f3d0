//! A settable/clearable one-shot wakeup, the async analogue of
//! `threading.Event`. [`crate::assembler`] pairs two of these with a mutex
//! to implement the message_complete/message_fetched rendezvous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct OneShotEvent {
    flag: AtomicBool,
    notify: Notify,
}

impl OneShotEvent {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until set. Registers interest with the `Notify` before checking
    /// the flag so a `set()` racing with the check can't be missed.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Like [`Self::wait`] but gives up after `timeout`, returning whether
    /// the event was observed set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

//! Unbounded async FIFO queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

/// An unbounded FIFO queue that many tasks can push to and pop from.
///
/// `push` never blocks. Concurrent poppers are served in the order they
/// started waiting: the receiver sits behind a fair `tokio::sync::Mutex`.
pub struct AsyncQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    len: AtomicUsize,
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Append an item. Never blocks.
    pub fn push(&self, item: T) {
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            // Unreachable while `self` holds the receiver.
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait for the next item.
    ///
    /// Stays pending until an item is pushed; there is no close signal.
    pub async fn pop(&self) -> T {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(item) => {
                self.len.fetch_sub(1, Ordering::SeqCst);
                item
            }
            None => std::future::pending().await,
        }
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// On timeout the pending lock acquisition or receive is dropped, so no
    /// waiter stays registered and an item pushed afterwards stays queued
    /// for the next consumer.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

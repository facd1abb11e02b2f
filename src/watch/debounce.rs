// src/watch/debounce.rs

//! Trailing-edge debouncing for filesystem events.
//!
//! Rapid saves of the same file produce bursts of events; the debouncer
//! coalesces them by running only the most recently submitted action, once
//! the channel has been quiet for the configured interval. Coalescing is
//! per debouncer, not per path.

use std::time::Duration;

use tokio::sync::mpsc;

type Action = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Action>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce_loop(interval, rx));
        Self { tx }
    }

    /// Submit an action. It replaces any action still pending; whichever
    /// action is latest when the quiet interval elapses is the one that
    /// runs.
    pub fn call(&self, action: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(action));
    }
}

async fn debounce_loop(interval: Duration, mut rx: mpsc::UnboundedReceiver<Action>) {
    loop {
        let Some(mut pending) = rx.recv().await else {
            return;
        };

        // Keep replacing the pending action until the channel goes quiet.
        loop {
            match tokio::time::timeout(interval, rx.recv()).await {
                Ok(Some(action)) => pending = action,
                Ok(None) => {
                    pending();
                    return;
                }
                Err(_) => {
                    pending();
                    break;
                }
            }
        }
    }
}

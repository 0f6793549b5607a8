//! Session-wide running flag
//!
//! One writer (the session), many readers (acceptor and relays). Readers poll
//! the level on every loop iteration and may also await the falling edge.

use tokio::sync::watch;

/// Owning side of the running flag
#[derive(Debug)]
pub struct RunningSignal {
    tx: watch::Sender<bool>,
}

impl RunningSignal {
    /// New signal, initially lowered
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the flag. Returns whether it was raised before.
    pub fn lower(&self) -> bool {
        self.tx.send_replace(false)
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> RunningFlag {
        RunningFlag {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for RunningSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the running flag
#[derive(Debug, Clone)]
pub struct RunningFlag {
    rx: watch::Receiver<bool>,
}

impl RunningFlag {
    pub fn is_running(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is lowered or its owner is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|running| !*running).await;
    }
}

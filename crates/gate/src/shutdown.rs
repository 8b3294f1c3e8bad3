//! Shutdown signalling
//!
//! Bridges SIGINT/SIGTERM into a watch channel that every listener holds a
//! receiver for. Once triggered, listeners stop accepting and return.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which OS signal ended the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Ctrl-C (SIGINT)
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Sending half; dropping it also releases every waiter
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        debug!("Shutdown triggered");
        self.tx.send_replace(true);
    }
}

/// Receiving half, cloned into each listener
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown has been triggered
    pub async fn wait(&mut self) {
        // An error means the trigger is gone, which also ends the process
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Create a connected trigger and receiver
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Wait for SIGINT or, on Unix, SIGTERM
pub async fn wait_for_signal() -> SignalType {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => SignalType::Interrupt,
                    _ = term.recv() => SignalType::Terminate,
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler, only Ctrl-C will stop the server");
                let _ = tokio::signal::ctrl_c().await;
                SignalType::Interrupt
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        SignalType::Interrupt
    }
}

/// Trigger shutdown on the first signal
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal = ?signal, "Received signal, shutting down");
        trigger.trigger();
    })
}

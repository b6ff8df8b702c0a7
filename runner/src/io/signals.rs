//! Process-wide interrupt observation.
//!
//! A [`SignalObserver`] is installed by the top-level command and torn down
//! when it is dropped. Controllers only ever see the read-only [`Interrupt`]
//! handle and consult it at their suspension points.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::exit_codes;

/// Read-only view of whether an interrupt has been observed.
#[derive(Debug, Clone)]
pub struct Interrupt {
    receiver: watch::Receiver<bool>,
}

/// Write side of an [`Interrupt`]. Held by the signal listeners (or a test).
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
    sender: watch::Sender<bool>,
}

impl Interrupt {
    /// Create a linked trigger/handle pair.
    pub fn channel() -> (InterruptTrigger, Interrupt) {
        let (sender, receiver) = watch::channel(false);
        (InterruptTrigger { sender }, Interrupt { receiver })
    }

    /// An interrupt that never fires.
    pub fn never() -> Interrupt {
        let (trigger, interrupt) = Interrupt::channel();
        // Receivers keep the value readable after the sender is gone.
        drop(trigger);
        interrupt
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once triggered. Pends forever if the trigger side is gone.
    pub async fn triggered(&mut self) {
        if self.receiver.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless interrupted first.
    ///
    /// Returns `true` if the sleep was cut short by an interrupt.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => false,
            () = self.triggered() => true,
        }
    }
}

impl InterruptTrigger {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Listens for SIGINT and SIGTERM while alive.
///
/// The first signal trips the [`Interrupt`]; a second one exits the process
/// with [`exit_codes::INTERRUPTED`] without waiting for a suspension point.
#[derive(Debug)]
pub struct SignalObserver {
    interrupt: Interrupt,
    listener: JoinHandle<()>,
}

impl SignalObserver {
    /// Register the signal listener. Must be called inside a tokio runtime.
    pub fn install() -> Result<Self> {
        let (trigger, interrupt) = Interrupt::channel();

        #[cfg(unix)]
        let listener = {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
            let mut sigterm =
                signal(SignalKind::terminate()).context("install SIGTERM handler")?;
            tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        Some(()) = sigint.recv() => "SIGINT",
                        Some(()) = sigterm.recv() => "SIGTERM",
                        else => break,
                    };
                    on_signal(&trigger, name);
                }
            })
        };

        #[cfg(not(unix))]
        let listener = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                on_signal(&trigger, "Ctrl+C");
            }
        });

        Ok(Self {
            interrupt,
            listener,
        })
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }
}

fn on_signal(trigger: &InterruptTrigger, name: &str) {
    if trigger.is_triggered() {
        warn!(signal = name, "second signal, exiting now");
        std::process::exit(exit_codes::INTERRUPTED);
    }
    info!(signal = name, "stopping at next suspension point");
    trigger.trigger();
}

/// Stops listening. Tokio keeps its process-wide handler registered, so
/// signals arriving after this are swallowed; keep the observer alive until
/// the process is about to exit.
impl Drop for SignalObserver {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

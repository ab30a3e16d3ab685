//! Termination signals
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) requests a graceful stop. A
//! second one while the stop is still running requests a forced shutdown:
//! the caller abandons the stop and returns, and dropping the orchestrator
//! kills the packager.

use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use xdl_core::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// What the signal handler has asked for so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Graceful,
    Forced,
}

impl ShutdownState {
    /// State after one more termination signal
    pub fn escalate(self) -> Self {
        match self {
            Self::Running => Self::Graceful,
            Self::Graceful | Self::Forced => Self::Forced,
        }
    }

    pub fn is_requested(self) -> bool {
        self != Self::Running
    }
}

/// Watch for termination signals in the background.
///
/// Each signal escalates the state published on `shutdown_tx`; the task
/// ends once `Forced` is reached.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<ShutdownState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match Signals::install() {
            Ok(signals) => signals,
            Err(e) => {
                error!("Signal handler error: {}", e);
                return;
            }
        };

        loop {
            let signal = match signals.recv().await {
                Ok(signal) => signal,
                Err(e) => {
                    error!("Signal handler error: {}", e);
                    return;
                }
            };

            let state = shutdown_tx.borrow().escalate();
            match state {
                ShutdownState::Forced => warn!("Received {} during shutdown, forcing", signal),
                _ => info!("Received {}, shutting down", signal),
            }
            if shutdown_tx.send(state).is_err() || state == ShutdownState::Forced {
                return;
            }
        }
    })
}

/// Resolve on the next termination signal
pub async fn wait_for_signal() -> Result<TerminationSignal> {
    Signals::install()?.recv().await
}

/// Installed OS signal listeners
struct Signals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::process(format!("Failed to install SIGINT handler: {}", e)))?;
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::process(format!("Failed to install SIGTERM handler: {}", e)))?;
        Ok(Self { sigint, sigterm })
    }

    #[cfg(windows)]
    fn install() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> Result<TerminationSignal> {
        let signal = tokio::select! {
            _ = self.sigint.recv() => TerminationSignal::Interrupt,
            _ = self.sigterm.recv() => TerminationSignal::Terminate,
        };
        Ok(signal)
    }

    #[cfg(windows)]
    async fn recv(&mut self) -> Result<TerminationSignal> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::process(format!("Failed to listen for Ctrl+C: {}", e)))?;
        Ok(TerminationSignal::Interrupt)
    }
}

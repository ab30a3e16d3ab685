//! Lifecycle events published by the packager, tunnel and local server
//!
//! Observers receive [`PackagerEvent`]s through an [`EventBus`], a thin wrapper
//! over a `tokio::sync::broadcast` channel. Components only ever hold a clone of
//! the bus; nothing is registered dynamically.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity of the event bus ring buffer
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Observable lifecycle events.
///
/// Serialized with an `event` tag carrying the same label as
/// [`PackagerEvent::event_type`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PackagerEvent {
    // ─────────────────────────────────────────────────────────
    // Packager Output
    // ─────────────────────────────────────────────────────────
    /// A line written to the packager's stdout
    Stdout { line: String },

    /// A line written to the packager's stderr, or a validation warning
    Stderr { line: String },

    // ─────────────────────────────────────────────────────────
    // Packager Lifecycle
    // ─────────────────────────────────────────────────────────
    /// The packager printed its readiness marker
    PackagerReady { pid: Option<u32> },

    /// A termination signal is about to be sent to the packager
    PackagerWillStop,

    /// The packager exited; emitted exactly once per process
    PackagerStopped { code: Option<i32> },

    // ─────────────────────────────────────────────────────────
    // Tunnel Lifecycle
    // ─────────────────────────────────────────────────────────
    #[serde(rename = "ngrok-will-start")]
    TunnelWillStart { port: u16 },

    #[serde(rename = "ngrok-did-start")]
    TunnelDidStart { port: u16, url: Option<String> },

    #[serde(rename = "ngrok-ready")]
    TunnelReady { port: u16, url: Option<String> },

    #[serde(rename = "ngrok-will-disconnect")]
    TunnelWillDisconnect { url: String },

    #[serde(rename = "ngrok-disconnected")]
    TunnelDisconnected { url: String },

    #[serde(rename = "ngrok-disconnect-err")]
    TunnelDisconnectError { message: String },
}

impl PackagerEvent {
    /// Returns the wire label for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::PackagerReady { .. } => "packager-ready",
            Self::PackagerWillStop => "packager-will-stop",
            Self::PackagerStopped { .. } => "packager-stopped",
            Self::TunnelWillStart { .. } => "ngrok-will-start",
            Self::TunnelDidStart { .. } => "ngrok-did-start",
            Self::TunnelReady { .. } => "ngrok-ready",
            Self::TunnelWillDisconnect { .. } => "ngrok-will-disconnect",
            Self::TunnelDisconnected { .. } => "ngrok-disconnected",
            Self::TunnelDisconnectError { .. } => "ngrok-disconnect-err",
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self::Stderr { line: line.into() }
    }
}

/// Cloneable publisher for [`PackagerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PackagerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: PackagerEvent) {
        tracing::trace!("event: {}", event.event_type());
        let _ = self.tx.send(event);
    }

    /// Subscribe to all events published after this call.
    ///
    /// Slow subscribers observe `RecvError::Lagged` once the ring buffer wraps.
    pub fn subscribe(&self) -> broadcast::Receiver<PackagerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

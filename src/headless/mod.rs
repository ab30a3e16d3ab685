//! Headless mode - NDJSON event output
//!
//! Every [`PackagerEvent`] published while the orchestrator runs is written
//! to stdout as one JSON object per line, stamped with the time it was
//! emitted. A few lifecycle events of the runner itself are mixed into the
//! same stream.
//!
//! # Example Output
//!
//! ```json
//! {"event":"started","server_url":"http://127.0.0.1:19000","packager_port":19001,"tunnel_url":null,"timestamp":1704700001000}
//! {"event":"packager-ready","pid":4242,"timestamp":1704700002000}
//! {"event":"stdout","line":"Loading dependency graph, done.","timestamp":1704700003000}
//! ```

pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use xdl_core::PackagerEvent;

/// Lifecycle events of the headless runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RunnerStatus {
    /// All resources were started
    Started {
        server_url: Option<String>,
        packager_port: Option<u16>,
        tunnel_url: Option<String>,
    },

    /// Everything was torn down
    Stopped { clean: bool },

    Error { message: String, fatal: bool },
}

/// One line of headless output
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HeadlessEvent {
    Packager {
        #[serde(flatten)]
        event: PackagerEvent,
        timestamp: i64,
    },
    Status {
        #[serde(flatten)]
        status: RunnerStatus,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        self.emit_to(&mut stdout);
    }

    /// Write this event as a single NDJSON line
    pub fn emit_to<W: Write>(&self, out: &mut W) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        if let Err(e) = writeln!(out, "{}", json) {
            error!("Failed to write headless event: {}", e);
            return;
        }

        // Consumers read line by line
        if let Err(e) = out.flush() {
            error!("Failed to flush headless output: {}", e);
        }
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn packager(event: PackagerEvent) -> Self {
        Self::Packager {
            event,
            timestamp: Self::now(),
        }
    }

    pub fn started(
        server_url: Option<String>,
        packager_port: Option<u16>,
        tunnel_url: Option<String>,
    ) -> Self {
        Self::status(RunnerStatus::Started {
            server_url,
            packager_port,
            tunnel_url,
        })
    }

    pub fn stopped(clean: bool) -> Self {
        Self::status(RunnerStatus::Stopped { clean })
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::status(RunnerStatus::Error { message, fatal })
    }

    fn status(status: RunnerStatus) -> Self {
        Self::Status {
            status,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_packager_event_is_flattened() {
        let value = to_value(&HeadlessEvent::packager(PackagerEvent::PackagerReady {
            pid: Some(42),
        }));

        assert_eq!(value["event"], "packager-ready");
        assert_eq!(value["pid"], 42);
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_tunnel_event_label() {
        let value = to_value(&HeadlessEvent::packager(PackagerEvent::TunnelReady {
            port: 19000,
            url: None,
        }));

        assert_eq!(value["event"], "ngrok-ready");
        assert_eq!(value["port"], 19000);
        assert!(value["url"].is_null());
    }

    #[test]
    fn test_started_serialization() {
        let value = to_value(&HeadlessEvent::started(
            Some("http://127.0.0.1:19000".to_string()),
            Some(19001),
            None,
        ));

        assert_eq!(value["event"], "started");
        assert_eq!(value["server_url"], "http://127.0.0.1:19000");
        assert_eq!(value["packager_port"], 19001);
        assert!(value["tunnel_url"].is_null());
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error("Connection failed".to_string(), true));

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Connection failed");
        assert_eq!(value["fatal"], true);
    }

    #[test]
    fn test_emit_to_writes_one_line() {
        let mut out = Vec::new();
        HeadlessEvent::stopped(true).emit_to(&mut out);
        HeadlessEvent::stopped(false).emit_to(&mut out);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"event":"stopped","clean":true,"timestamp":"#));
    }
}

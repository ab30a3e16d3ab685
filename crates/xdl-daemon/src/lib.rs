//! # xdl-daemon - Packager and Tunnel Management
//!
//! Supervises the packager child process and the public tunnel that exposes
//! the local server.
//!
//! Depends on [`xdl_core`] for domain types, events and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`ProcessSupervisor`] - Start/stop/restart policy for the packager
//! - [`PackagerProcess`] - A single spawned packager with exit tracking
//! - [`StopOutcome`] - Result of a stop request
//!
//! ### Tunnels
//! - [`TunnelManager`] - Hostname derivation and tunnel lifecycle
//! - [`TunnelConnector`] - Seam for the tunnel service
//! - [`NgrokAgent`] - Connector backed by a local ngrok agent
//!
//! ### Ports
//! - [`find_free_ports()`] - Probe for bindable ports

pub mod ngrok;
pub mod ports;
pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tunnel;

pub use ngrok::{NgrokAgent, DEFAULT_AGENT_API};
pub use ports::{find_free_ports, is_port_free};
pub use process::{PackagerProcess, ProcessState, ProcessSupervisor, StopOutcome, STOP_TIMEOUT};
pub use tunnel::{TunnelConnector, TunnelManager, TunnelOptions};

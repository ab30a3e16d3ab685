//! # xdl-app - Orchestration
//!
//! Composes the packager, the tunnel and the local server into one
//! [`Orchestrator`], and provides the production collaborators and tool
//! configuration used by the `xdl` binary.
//!
//! ## Public API
//!
//! - [`Orchestrator`] - Start/stop/restart of all resources for one project
//! - [`StopReport`] - Per-resource outcome of a full stop
//! - [`LocalEnvironment`] - File- and HTTP-backed collaborators
//! - [`XdlConfig`] - `~/.xdl/config.toml`
//! - [`spawn_signal_handler()`] - SIGINT/SIGTERM to a shutdown flag

pub mod config;
pub mod environment;
pub mod orchestrator;
pub mod signals;

pub use config::{config_dir, load_config, save_config, XdlConfig};
pub use environment::{ApiClient, LocalEnvironment};
pub use orchestrator::{resolve_entry_point, Orchestrator, StopReport};
pub use signals::{spawn_signal_handler, wait_for_signal, ShutdownState, TerminationSignal};

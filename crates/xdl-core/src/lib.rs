//! # xdl-core - Core Domain Types
//!
//! Foundation crate for xdl. Provides domain types, error handling, lifecycle
//! events, URL helpers and the collaborator traits the orchestrator consumes.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`PackagerConfig`] - Resolved project/packager configuration
//! - [`ProjectSettings`], [`SettingsPatch`] - Per-project packager options
//! - [`PackagerInfo`] - Connection info persisted after startup
//! - [`PackageJson`] - The parts of package.json the orchestrator reads
//!
//! ### Events (`events`)
//! - [`PackagerEvent`] - Typed lifecycle events (`packager-ready`, `ngrok-ready`, ...)
//! - [`EventBus`] - Broadcast publisher shared by all components
//!
//! ### Collaborators (`services`)
//! - [`Environment`] - Umbrella bound over [`ManifestSource`], [`SessionProvider`],
//!   [`SettingsStore`], [`ExpApi`] and [`PortAllocator`]
//!
//! ### Validation (`validation`)
//! - [`validate_package_json()`] - package.json checks reported as `Stderr` events
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use xdl_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod services;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod types;
pub mod urls;
pub mod validation;

/// Prelude for common imports used throughout all xdl crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{EventBus, PackagerEvent, EVENT_BUS_CAPACITY};
pub use services::{
    Environment, ExpApi, ManifestSource, PortAllocator, SessionProvider, SettingsStore,
};
pub use types::{
    guess_main_module_path, HostType, PackageJson, PackagerConfig, PackagerInfo, ProjectSettings,
    SdkVersionInfo, SettingsPatch, SignArgs, TunnelConfig, UrlType, User, DEFAULT_ENTRY_POINT,
};
pub use validation::{validate_package_json, Validation};

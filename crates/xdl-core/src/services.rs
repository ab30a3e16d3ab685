//! Collaborator interfaces consumed by the orchestrator
//!
//! Everything the core needs from the outside world (project files, the user
//! session, settings persistence, the remote API, port allocation) goes through
//! these traits. Production implementations live in `xdl-app`; tests use
//! [`MockEnvironment`](crate::test_utils::MockEnvironment).
//!
//! Each trait is declared with `trait_variant` so that the `Send` variant can be
//! used from spawned tasks and axum handlers. Implement the `Send` variant.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::{
    PackageJson, PackagerInfo, ProjectSettings, SdkVersionInfo, SettingsPatch, SignArgs, User,
};

/// Reads the project manifest (package.json)
#[trait_variant::make(ManifestSource: Send)]
pub trait LocalManifestSource {
    /// `Ok(None)` when the project has no manifest file
    async fn read_manifest(&self, root: &Path) -> Result<Option<PackageJson>>;
}

/// Resolves the logged-in user
#[trait_variant::make(SessionProvider: Send)]
pub trait LocalSessionProvider {
    async fn current_user(&self) -> Option<User>;
}

/// Project and user settings persistence
#[trait_variant::make(SettingsStore: Send)]
pub trait LocalSettingsStore {
    async fn read_settings(&self, root: &Path) -> Result<ProjectSettings>;

    /// Merge `patch` into the stored settings
    async fn write_settings(&self, root: &Path, patch: &SettingsPatch) -> Result<()>;

    async fn read_packager_info(&self, root: &Path) -> Result<PackagerInfo>;

    async fn write_packager_info(&self, root: &Path, info: &PackagerInfo) -> Result<()>;

    /// Stable stand-in username used while logged out
    async fn read_or_create_placeholder_username(&self) -> Result<String>;
}

/// Remote API calls
#[trait_variant::make(ExpApi: Send)]
pub trait LocalExpApi {
    /// Returns the signed, serialized manifest
    async fn sign_manifest(&self, args: &SignArgs, manifest: &Map<String, Value>)
        -> Result<String>;

    async fn sdk_versions(&self) -> Result<BTreeMap<String, SdkVersionInfo>>;
}

/// Free TCP port allocation
#[trait_variant::make(PortAllocator: Send)]
pub trait LocalPortAllocator {
    /// `count` distinct free ports, searching upward from `range_start`
    async fn allocate_free_ports(&self, count: usize, range_start: u16) -> Result<Vec<u16>>;
}

/// Everything the orchestrator and local server need, in one bound.
pub trait Environment:
    ManifestSource + SessionProvider + SettingsStore + ExpApi + PortAllocator + Send + Sync + 'static
{
}

impl<T> Environment for T where
    T: ManifestSource + SessionProvider + SettingsStore + ExpApi + PortAllocator + Send + Sync + 'static
{
}

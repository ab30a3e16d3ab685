//! Test utilities: an in-memory [`Environment`](crate::services::Environment)
//!
//! Every collaborator is backed by a `Mutex`-guarded field that tests can seed
//! and inspect. Signing calls are counted so cache behaviour can be asserted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::services::{ExpApi, ManifestSource, PortAllocator, SessionProvider, SettingsStore};
use crate::types::{
    PackageJson, PackagerInfo, ProjectSettings, SdkVersionInfo, SettingsPatch, SignArgs, User,
};

/// In-memory collaborators for tests.
#[derive(Debug, Default)]
pub struct MockEnvironment {
    pub manifest: Mutex<Option<PackageJson>>,
    pub user: Mutex<Option<User>>,
    pub settings: Mutex<ProjectSettings>,
    pub packager_info: Mutex<PackagerInfo>,
    pub placeholder: Mutex<Option<String>>,
    pub sdk_versions: Mutex<Option<BTreeMap<String, SdkVersionInfo>>>,
    /// When set, `sign_manifest` fails with this message
    pub sign_failure: Mutex<Option<String>>,
    /// Artificial latency for `sign_manifest`
    pub sign_delay: Mutex<Option<Duration>>,
    /// Ports handed out by `allocate_free_ports`, in order
    pub free_ports: Mutex<Vec<u16>>,
    sign_calls: AtomicUsize,
    settings_writes: AtomicUsize,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment with a manifest declaring `sdk_version`
    pub fn with_sdk_version(sdk_version: &str) -> Self {
        let env = Self::new();
        env.set_manifest(package_json_with_sdk(sdk_version));
        env
    }

    pub fn set_manifest(&self, manifest: PackageJson) {
        *self.manifest.lock().unwrap() = Some(manifest);
    }

    pub fn set_user(&self, username: &str) {
        *self.user.lock().unwrap() = Some(User {
            username: username.to_string(),
        });
    }

    pub fn set_settings(&self, settings: ProjectSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    pub fn set_packager_info(&self, info: PackagerInfo) {
        *self.packager_info.lock().unwrap() = info;
    }

    pub fn set_sdk_versions(&self, table: BTreeMap<String, SdkVersionInfo>) {
        *self.sdk_versions.lock().unwrap() = Some(table);
    }

    pub fn set_free_ports(&self, ports: Vec<u16>) {
        *self.free_ports.lock().unwrap() = ports;
    }

    pub fn fail_signing(&self, message: &str) {
        *self.sign_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_sign_delay(&self, delay: Duration) {
        *self.sign_delay.lock().unwrap() = Some(delay);
    }

    /// Number of `sign_manifest` calls made so far
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Number of `write_settings` calls made so far
    pub fn settings_writes(&self) -> usize {
        self.settings_writes.load(Ordering::SeqCst)
    }

    pub fn packager_info(&self) -> PackagerInfo {
        self.packager_info.lock().unwrap().clone()
    }
}

/// package.json with `exp.sdkVersion` set and the forked react-native dependency
pub fn package_json_with_sdk(sdk_version: &str) -> PackageJson {
    serde_json::from_value(serde_json::json!({
        "name": "test-app",
        "dependencies": {
            "react-native": format!("github:exponentjs/react-native#sdk-{}", sdk_version)
        },
        "exp": { "sdkVersion": sdk_version, "name": "Test App", "slug": "test-app" }
    }))
    .expect("valid package.json fixture")
}

impl ManifestSource for MockEnvironment {
    async fn read_manifest(&self, _root: &Path) -> Result<Option<PackageJson>> {
        Ok(self.manifest.lock().unwrap().clone())
    }
}

impl SessionProvider for MockEnvironment {
    async fn current_user(&self) -> Option<User> {
        self.user.lock().unwrap().clone()
    }
}

impl SettingsStore for MockEnvironment {
    async fn read_settings(&self, _root: &Path) -> Result<ProjectSettings> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn write_settings(&self, _root: &Path, patch: &SettingsPatch) -> Result<()> {
        self.settings_writes.fetch_add(1, Ordering::SeqCst);
        patch.apply(&mut self.settings.lock().unwrap());
        Ok(())
    }

    async fn read_packager_info(&self, _root: &Path) -> Result<PackagerInfo> {
        Ok(self.packager_info.lock().unwrap().clone())
    }

    async fn write_packager_info(&self, _root: &Path, info: &PackagerInfo) -> Result<()> {
        *self.packager_info.lock().unwrap() = info.clone();
        Ok(())
    }

    async fn read_or_create_placeholder_username(&self) -> Result<String> {
        let mut placeholder = self.placeholder.lock().unwrap();
        Ok(placeholder
            .get_or_insert_with(|| "anon-test".to_string())
            .clone())
    }
}

impl ExpApi for MockEnvironment {
    async fn sign_manifest(&self, args: &SignArgs, manifest: &Map<String, Value>) -> Result<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.sign_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(Error::api(message));
        }
        let body = serde_json::to_string(manifest)?;
        Ok(serde_json::json!({ "signedBy": args.username, "manifestString": body }).to_string())
    }

    async fn sdk_versions(&self) -> Result<BTreeMap<String, SdkVersionInfo>> {
        self.sdk_versions
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::api("sdk version table unavailable"))
    }
}

impl PortAllocator for MockEnvironment {
    async fn allocate_free_ports(&self, count: usize, range_start: u16) -> Result<Vec<u16>> {
        let mut ports = self.free_ports.lock().unwrap();
        if ports.is_empty() {
            return Ok((0..count as u16).map(|i| range_start + i).collect());
        }
        if ports.len() < count {
            return Err(Error::config("not enough free ports"));
        }
        Ok(ports.drain(..count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_signing_is_counted() {
        let env = MockEnvironment::new();
        let args = SignArgs::for_project(
            &User {
                username: "u".to_string(),
            },
            None,
            "app",
        );
        env.sign_manifest(&args, &Map::new()).await.unwrap();
        env.sign_manifest(&args, &Map::new()).await.unwrap();
        assert_eq!(env.sign_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_placeholder_is_stable() {
        let env = MockEnvironment::new();
        let first = env.read_or_create_placeholder_username().await.unwrap();
        let second = env.read_or_create_placeholder_username().await.unwrap();
        assert_eq!(first, second);
    }
}

//! File- and HTTP-backed collaborators
//!
//! [`LocalEnvironment`] is the production [`Environment`](xdl_core::Environment):
//! project files under `<root>/.exponent/`, user settings under
//! `~/.exponent/`, the remote API over HTTP and port probing on this machine.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use xdl_core::prelude::*;
use xdl_core::urls::placeholder_username;
use xdl_core::{
    ExpApi, ManifestSource, PackageJson, PackagerInfo, PortAllocator, ProjectSettings,
    SdkVersionInfo, SessionProvider, SettingsPatch, SettingsStore, SignArgs, User,
};

use crate::config::XdlConfig;

const PROJECT_DIR: &str = ".exponent";
const SETTINGS_FILENAME: &str = "settings.json";
const PACKAGER_INFO_FILENAME: &str = "packager-info.json";
const USER_SETTINGS_FILENAME: &str = "user-settings.json";
const PLACEHOLDER_KEY: &str = "loggedOutPlaceholderUsername";

/// Characters `encodeURIComponent` leaves alone
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

// ─────────────────────────────────────────────────────────────────
// JSON files
// ─────────────────────────────────────────────────────────────────

/// Read a JSON file, `Ok(None)` if it does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a JSON file, falling back to defaults when missing or malformed.
async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path).await {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            T::default()
        }
    }
}

/// Merge the keys of `patch` into the JSON object stored at `path`.
///
/// The read-modify-write happens under an exclusive file lock.
async fn merge_json(path: PathBuf, patch: Map<String, Value>) -> Result<()> {
    tokio::task::spawn_blocking(move || merge_json_blocking(&path, patch))
        .await
        .map_err(|e| Error::config(format!("settings writer failed: {}", e)))?
}

fn merge_json_blocking(path: &Path, patch: Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::config(format!("Failed to open {:?}: {}", path, e)))?;

    // Blocks if another process holds the lock
    file.lock_exclusive()
        .map_err(|e| Error::config(format!("Failed to lock {:?}: {}", path, e)))?;

    let existing = std::fs::read_to_string(path)?;
    let mut object = match serde_json::from_str::<Value>(&existing) {
        Ok(Value::Object(object)) => object,
        _ if existing.trim().is_empty() => Map::new(),
        _ => {
            warn!("Replacing malformed settings file {:?}", path);
            Map::new()
        }
    };
    object.extend(patch);

    let content = serde_json::to_string_pretty(&Value::Object(object))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.flush()?;

    // Lock is released when the file is dropped
    debug!("Updated {:?}", path);
    Ok(())
}

fn to_object<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(object) => Ok(object),
        other => Err(Error::config(format!("expected a JSON object, got {}", other))),
    }
}

// ─────────────────────────────────────────────────────────────────
// Remote API
// ─────────────────────────────────────────────────────────────────

/// HTTP client for the remote API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<base>/--/api/<method>/<encoded JSON args>`
    pub fn method_url(&self, method: &str, args: &Value) -> String {
        let args = args.to_string();
        format!(
            "{}/--/api/{}/{}",
            self.base_url,
            utf8_percent_encode(method, URI_COMPONENT),
            utf8_percent_encode(&args, URI_COMPONENT)
        )
    }

    /// `<base>/--/<path>`
    pub fn path_url(&self, path: &str) -> String {
        format!("{}/--/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Call an API method, returning the body's `response` field.
    pub async fn call_method(&self, method: &str, args: &Value, body: &Value) -> Result<Value> {
        let url = self.method_url(method, args);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::api(format!("{} failed: {}", method, e)))?;

        let status = response.status();
        let mut payload: Value = response
            .json()
            .await
            .map_err(|e| Error::api(format!("{} returned invalid JSON ({}): {}", method, status, e)))?;

        if let Some(err) = payload.get("err") {
            return Err(Error::api(format!("{} failed: {}", method, err)));
        }
        if !status.is_success() {
            return Err(Error::api(format!("{} failed with status {}", method, status)));
        }

        payload
            .get_mut("response")
            .map(Value::take)
            .ok_or_else(|| Error::api(format!("{} response is missing `response`", method)))
    }

    pub async fn get_path<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.path_url(path);
        debug!("GET {}", url);
        self.client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::api(format!("GET {} failed: {}", path, e)))?
            .json()
            .await
            .map_err(|e| Error::api(format!("GET {} returned invalid JSON: {}", path, e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// LocalEnvironment
// ─────────────────────────────────────────────────────────────────

/// Production collaborators.
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    api: ApiClient,
    user_settings_path: PathBuf,
}

impl LocalEnvironment {
    pub fn new(config: &XdlConfig) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_user_dir(config, home.join(PROJECT_DIR))
    }

    /// Keep user settings in `user_dir` instead of `~/.exponent`
    pub fn with_user_dir(config: &XdlConfig, user_dir: impl AsRef<Path>) -> Self {
        Self {
            api: ApiClient::new(config.api.base_url.clone()),
            user_settings_path: user_dir.as_ref().join(USER_SETTINGS_FILENAME),
        }
    }

    pub fn settings_path(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR).join(SETTINGS_FILENAME)
    }

    pub fn packager_info_path(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR).join(PACKAGER_INFO_FILENAME)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    async fn user_settings(&self) -> Map<String, Value> {
        read_json_or_default(&self.user_settings_path).await
    }
}

impl ManifestSource for LocalEnvironment {
    async fn read_manifest(&self, root: &Path) -> Result<Option<PackageJson>> {
        read_json(&root.join("package.json")).await
    }
}

impl SessionProvider for LocalEnvironment {
    async fn current_user(&self) -> Option<User> {
        let settings = self.user_settings().await;
        settings
            .get("username")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(|username| User {
                username: username.to_string(),
            })
    }
}

impl SettingsStore for LocalEnvironment {
    async fn read_settings(&self, root: &Path) -> Result<ProjectSettings> {
        Ok(read_json_or_default(&Self::settings_path(root)).await)
    }

    async fn write_settings(&self, root: &Path, patch: &SettingsPatch) -> Result<()> {
        merge_json(Self::settings_path(root), to_object(patch)?).await
    }

    async fn read_packager_info(&self, root: &Path) -> Result<PackagerInfo> {
        Ok(read_json_or_default(&Self::packager_info_path(root)).await)
    }

    async fn write_packager_info(&self, root: &Path, info: &PackagerInfo) -> Result<()> {
        merge_json(Self::packager_info_path(root), to_object(info)?).await
    }

    async fn read_or_create_placeholder_username(&self) -> Result<String> {
        let settings = self.user_settings().await;
        if let Some(existing) = settings.get(PLACEHOLDER_KEY).and_then(Value::as_str) {
            return Ok(existing.to_string());
        }

        let username = placeholder_username();
        let mut patch = Map::new();
        patch.insert(PLACEHOLDER_KEY.to_string(), Value::String(username.clone()));
        merge_json(self.user_settings_path.clone(), patch).await?;
        Ok(username)
    }
}

impl ExpApi for LocalEnvironment {
    async fn sign_manifest(&self, args: &SignArgs, manifest: &Map<String, Value>) -> Result<String> {
        let args = Value::Array(vec![serde_json::to_value(args)?]);
        let response = self
            .api
            .call_method("signManifest", &args, &Value::Object(manifest.clone()))
            .await?;
        Ok(match response {
            Value::String(signed) => signed,
            other => other.to_string(),
        })
    }

    async fn sdk_versions(&self) -> Result<BTreeMap<String, SdkVersionInfo>> {
        self.api.get_path("sdk-versions").await
    }
}

impl PortAllocator for LocalEnvironment {
    async fn allocate_free_ports(&self, count: usize, range_start: u16) -> Result<Vec<u16>> {
        xdl_daemon::find_free_ports(count, range_start)
    }
}

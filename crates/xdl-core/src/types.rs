//! Core domain types

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Entry point used when neither the caller nor package.json names one
pub const DEFAULT_ENTRY_POINT: &str = "index.js";

/// Packager CLI script, relative to the project root
pub const DEFAULT_CLI_SCRIPT: &str = "node_modules/react-native/local-cli/cli.js";

/// Interpreter used to run the packager CLI script
pub const DEFAULT_LAUNCHER: &str = "node";

// ─────────────────────────────────────────────────────────────────
// Packager Configuration
// ─────────────────────────────────────────────────────────────────

/// Resolved configuration for one orchestrated project.
///
/// Ports and the entry point may be left unset and are filled in by the
/// orchestrator before any resource starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerConfig {
    /// Absolute path of the project
    pub project_root: PathBuf,
    /// Bundler entry-point module, relative to the project root
    pub entry_point: Option<String>,
    /// Port of the local HTTP server
    pub port: Option<u16>,
    /// Port the packager listens on
    pub packager_port: Option<u16>,
    /// Interpreter used to run the packager CLI
    pub launcher: PathBuf,
    /// Packager CLI script
    pub cli_path: PathBuf,
    /// Working directory for the packager process
    pub working_dir: PathBuf,
}

impl PackagerConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let cli_path = project_root.join(DEFAULT_CLI_SCRIPT);
        let working_dir = default_working_dir(&cli_path, &project_root);
        Self {
            project_root,
            entry_point: None,
            port: None,
            packager_port: None,
            launcher: PathBuf::from(DEFAULT_LAUNCHER),
            cli_path,
            working_dir,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn with_ports(mut self, port: u16, packager_port: u16) -> Self {
        self.port = Some(port);
        self.packager_port = Some(packager_port);
        self
    }

    pub fn with_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
        self.launcher = launcher.into();
        self
    }

    /// Override the CLI script; the working directory follows it.
    pub fn with_cli_path(mut self, cli_path: impl Into<PathBuf>) -> Self {
        self.cli_path = cli_path.into();
        self.working_dir = default_working_dir(&self.cli_path, &self.project_root);
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    /// Base name of the project directory
    pub fn project_short_name(&self) -> String {
        self.project_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Local server port, or a configuration error if unassigned
    pub fn require_port(&self) -> Result<u16> {
        self.port
            .ok_or_else(|| Error::config("the local server port must be set before starting"))
    }

    /// Packager port, or a configuration error if unassigned
    pub fn require_packager_port(&self) -> Result<u16> {
        self.packager_port
            .ok_or_else(|| Error::config("the packager port must be set before starting"))
    }

    /// Project root, or a configuration error if it is empty or missing
    pub fn require_project_root(&self) -> Result<&Path> {
        if self.project_root.as_os_str().is_empty() {
            return Err(Error::config("the project root must be set"));
        }
        if !self.project_root.is_dir() {
            return Err(Error::NoProject {
                path: self.project_root.clone(),
            });
        }
        Ok(&self.project_root)
    }

    /// Main module path used in bundle and sourcemap URLs
    pub fn main_module_path(&self) -> Result<String> {
        self.entry_point
            .as_deref()
            .map(guess_main_module_path)
            .ok_or_else(|| Error::config("the entry point must be resolved before serving"))
    }
}

/// Two levels above the CLI script (`node_modules/react-native`), else the root
fn default_working_dir(cli_path: &Path, project_root: &Path) -> PathBuf {
    cli_path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_root.to_path_buf())
}

/// Normalize an entry point into the module path the packager serves.
///
/// Only a leading `./` or `/` is dropped; the extension is kept.
pub fn guess_main_module_path(entry_point: &str) -> String {
    let trimmed = entry_point.trim();
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    trimmed.trim_start_matches('/').to_string()
}

/// Tunnel service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Service domain suffix appended to every hostname
    pub domain: String,
    /// Auth token passed on connect
    pub auth_token: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            domain: "exp.direct".to_string(),
            auth_token: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Project Settings
// ─────────────────────────────────────────────────────────────────

/// Which host the manifest's bundle URL points at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    #[default]
    Tunnel,
    Lan,
    Localhost,
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Tunnel => write!(f, "tunnel"),
            HostType::Lan => write!(f, "lan"),
            HostType::Localhost => write!(f, "localhost"),
        }
    }
}

/// Scheme used for URLs shown to the developer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlType {
    Http,
    #[default]
    Exp,
}

/// Per-project packager settings, stored under `.exponent/settings.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    pub host_type: HostType,
    pub dev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
    pub url_type: UrlType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_randomness: Option<String>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            host_type: HostType::Tunnel,
            dev: true,
            strict: None,
            minify: None,
            url_type: UrlType::Exp,
            url_randomness: None,
        }
    }
}

/// Partial update merged into the stored project settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_type: Option<HostType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_randomness: Option<String>,
}

impl SettingsPatch {
    pub fn url_randomness(value: impl Into<String>) -> Self {
        Self {
            url_randomness: Some(value.into()),
            ..Self::default()
        }
    }

    /// Apply this patch to an in-memory settings value
    pub fn apply(&self, settings: &mut ProjectSettings) {
        if let Some(host_type) = self.host_type {
            settings.host_type = host_type;
        }
        if let Some(dev) = self.dev {
            settings.dev = dev;
        }
        if self.strict.is_some() {
            settings.strict = self.strict;
        }
        if self.minify.is_some() {
            settings.minify = self.minify;
        }
        if let Some(randomness) = &self.url_randomness {
            settings.url_randomness = Some(randomness.clone());
        }
    }
}

/// Connection info persisted after startup, `.exponent/packager-info.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackagerInfo {
    pub port: Option<u16>,
    pub packager_port: Option<u16>,
    pub ngrok: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Project Manifest (package.json)
// ─────────────────────────────────────────────────────────────────

/// The subset of package.json the orchestrator reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
    /// App manifest section; passed through to clients untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<Map<String, Value>>,
}

impl PackageJson {
    pub fn sdk_version(&self) -> Option<&str> {
        self.exp.as_ref()?.get("sdkVersion")?.as_str()
    }

    pub fn slug(&self) -> Option<&str> {
        self.exp.as_ref()?.get("slug")?.as_str()
    }

    pub fn dependency(&self, name: &str) -> Option<&str> {
        self.dependencies.as_ref()?.get(name).map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────
// Session / Remote API
// ─────────────────────────────────────────────────────────────────

/// Logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

/// Entry of the remote SDK version table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkVersionInfo {
    #[serde(rename = "exponent-react-native-tag", alias = "expectedTagName")]
    pub expected_tag_name: String,
}

/// Publish identity sent alongside a manifest signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignArgs {
    pub username: String,
    pub remote_username: String,
    pub remote_package_name: String,
    pub remote_full_package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
}

impl SignArgs {
    /// Build signing args for `user`, publishing under the manifest slug or the
    /// project directory name.
    pub fn for_project(user: &User, package: Option<&PackageJson>, short_name: &str) -> Self {
        let package_name = package
            .and_then(PackageJson::slug)
            .unwrap_or(short_name)
            .to_string();
        Self {
            username: user.username.clone(),
            remote_username: user.username.clone(),
            remote_full_package_name: format!("@{}/{}", user.username, package_name),
            remote_package_name: package_name,
            sdk_version: package.and_then(PackageJson::sdk_version).map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_follow_project_root() {
        let config = PackagerConfig::new("/work/my-app");
        assert_eq!(
            config.cli_path,
            PathBuf::from("/work/my-app/node_modules/react-native/local-cli/cli.js")
        );
        assert_eq!(
            config.working_dir,
            PathBuf::from("/work/my-app/node_modules/react-native")
        );
        assert_eq!(config.launcher, PathBuf::from("node"));
        assert_eq!(config.project_short_name(), "my-app");
    }

    #[test]
    fn test_with_cli_path_moves_working_dir() {
        let config = PackagerConfig::new("/work/app").with_cli_path("/opt/rn/bin/cli.js");
        assert_eq!(config.working_dir, PathBuf::from("/opt/rn"));
    }

    #[test]
    fn test_require_ports_are_config_errors() {
        let config = PackagerConfig::new("/work/app");
        assert!(matches!(config.require_port(), Err(Error::Config { .. })));
        assert!(matches!(
            config.require_packager_port(),
            Err(Error::Config { .. })
        ));

        let config = config.with_ports(19000, 19001);
        assert_eq!(config.require_port().unwrap(), 19000);
        assert_eq!(config.require_packager_port().unwrap(), 19001);
    }

    #[test]
    fn test_require_project_root_missing_dir() {
        let config = PackagerConfig::new("/definitely/not/here");
        assert!(matches!(
            config.require_project_root(),
            Err(Error::NoProject { .. })
        ));
        let config = PackagerConfig::new("");
        assert!(matches!(
            config.require_project_root(),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_main_module_path() {
        let config = PackagerConfig::new("/work/app");
        assert!(config.main_module_path().is_err());

        let config = config.with_entry_point("./src/App.js");
        assert_eq!(config.main_module_path().unwrap(), "src/App.js");
        assert_eq!(guess_main_module_path("/main.js"), "main.js");
        assert_eq!(guess_main_module_path("index.ios.js"), "index.ios.js");
    }

    #[test]
    fn test_project_settings_defaults_from_empty_json() {
        let settings: ProjectSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ProjectSettings::default());
        assert_eq!(settings.host_type, HostType::Tunnel);
        assert!(settings.dev);
    }

    #[test]
    fn test_project_settings_camel_case() {
        let settings: ProjectSettings =
            serde_json::from_str(r#"{"hostType":"lan","urlRandomness":"ab-cde","minify":true}"#)
                .unwrap();
        assert_eq!(settings.host_type, HostType::Lan);
        assert_eq!(settings.url_randomness.as_deref(), Some("ab-cde"));
        assert_eq!(settings.minify, Some(true));
    }

    #[test]
    fn test_settings_patch_apply() {
        let mut settings = ProjectSettings::default();
        SettingsPatch::url_randomness("xy-zzz").apply(&mut settings);
        assert_eq!(settings.url_randomness.as_deref(), Some("xy-zzz"));
        assert_eq!(settings.host_type, HostType::Tunnel);

        let json = serde_json::to_value(SettingsPatch::url_randomness("q")).unwrap();
        assert_eq!(json, serde_json::json!({ "urlRandomness": "q" }));
    }

    #[test]
    fn test_package_json_accessors() {
        let pkg: PackageJson = serde_json::from_str(
            r#"{
                "name": "demo",
                "main": "main.js",
                "dependencies": { "react-native": "github:exponentjs/react-native#sdk-10.0.0" },
                "exp": { "sdkVersion": "10.0.0", "slug": "demo-app", "name": "Demo" }
            }"#,
        )
        .unwrap();
        assert_eq!(pkg.sdk_version(), Some("10.0.0"));
        assert_eq!(pkg.slug(), Some("demo-app"));
        assert_eq!(
            pkg.dependency("react-native"),
            Some("github:exponentjs/react-native#sdk-10.0.0")
        );
        assert_eq!(pkg.dependency("lodash"), None);
    }

    #[test]
    fn test_sdk_version_info_accepts_both_keys() {
        let a: SdkVersionInfo =
            serde_json::from_str(r#"{"exponent-react-native-tag":"sdk-10"}"#).unwrap();
        let b: SdkVersionInfo = serde_json::from_str(r#"{"expectedTagName":"sdk-10"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_args_prefers_slug() {
        let user = User {
            username: "jesse".to_string(),
        };
        let pkg: PackageJson = serde_json::from_str(r#"{"exp":{"slug":"rocket"}}"#).unwrap();
        let args = SignArgs::for_project(&user, Some(&pkg), "folder-name");
        assert_eq!(args.remote_package_name, "rocket");
        assert_eq!(args.remote_full_package_name, "@jesse/rocket");

        let args = SignArgs::for_project(&user, None, "folder-name");
        assert_eq!(args.remote_full_package_name, "@jesse/folder-name");
    }
}

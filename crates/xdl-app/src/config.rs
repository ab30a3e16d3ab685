//! Tool configuration, `~/.xdl/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use xdl_core::prelude::*;
use xdl_core::TunnelConfig;
use xdl_daemon::DEFAULT_AGENT_API;

const CONFIG_FILENAME: &str = "config.toml";
const XDL_DIR: &str = ".xdl";

/// First port tried when allocating server and packager ports
pub const DEFAULT_PORT_RANGE_START: u16 = 19000;

/// Default remote API host
pub const DEFAULT_API_BASE_URL: &str = "https://exp.host";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    pub domain: String,
    pub auth_token: Option<String>,
    /// Local API of the tunnel agent
    pub agent_api: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        let defaults = TunnelConfig::default();
        Self {
            domain: defaults.domain,
            auth_token: defaults.auth_token,
            agent_api: DEFAULT_AGENT_API.to_string(),
        }
    }
}

impl TunnelSettings {
    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            domain: self.domain.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub range_start: u16,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            range_start: DEFAULT_PORT_RANGE_START,
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XdlConfig {
    pub tunnel: TunnelSettings,
    pub api: ApiSettings,
    pub ports: PortSettings,
}

/// `~/.xdl`, or `./.xdl` when there is no home directory
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(XDL_DIR)
}

/// Load the configuration from `dir/config.toml`.
///
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_config(dir: &Path) -> XdlConfig {
    let config_path = dir.join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return XdlConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded config from {:?}", config_path);
                config
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                XdlConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            XdlConfig::default()
        }
    }
}

/// Save the configuration to `dir/config.toml`.
///
/// Uses atomic write (temp file + rename).
pub fn save_config(dir: &Path, config: &XdlConfig) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::config(format!("Failed to create {:?}: {}", dir, e)))?;

    let config_path = dir.join(CONFIG_FILENAME);
    let temp_path = dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
    let full_content = format!("# xdl configuration\n\n{}", content);

    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved config to {:?}", config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path());
        assert_eq!(config, XdlConfig::default());
        assert_eq!(config.tunnel.domain, "exp.direct");
        assert_eq!(config.tunnel.agent_api, "http://127.0.0.1:4040");
        assert_eq!(config.api.base_url, "https://exp.host");
        assert_eq!(config.ports.range_start, 19000);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "[tunnel]\nauth_token = \"abc\"\n\n[ports]\nrange_start = 20000\n",
        )
        .unwrap();

        let config = load_config(dir.path());
        assert_eq!(config.tunnel.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.tunnel.domain, "exp.direct");
        assert_eq!(config.ports.range_start, 20000);
        assert_eq!(config.tunnel.tunnel_config().auth_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "[tunnel\nnot toml").unwrap();
        assert_eq!(load_config(dir.path()), XdlConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let mut config = XdlConfig::default();
        config.api.base_url = "http://localhost:3000".to_string();
        config.tunnel.domain = "tunnel.example.com".to_string();

        save_config(dir.path(), &config).unwrap();
        assert!(!dir.path().join(".config.toml.tmp").exists());
        assert_eq!(load_config(dir.path()), config);
    }
}

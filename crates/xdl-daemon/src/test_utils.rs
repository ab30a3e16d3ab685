//! Test utilities for daemon types
//!
//! Provides a scriptable [`FakeTunnelConnector`] and helpers for running `sh`
//! scripts in place of the real packager.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use xdl_core::prelude::*;
use xdl_core::PackagerConfig;

use crate::tunnel::{TunnelConnector, TunnelOptions};

/// Prints the ready marker, then idles until signalled.
pub const FOREVER_SCRIPT: &str = "echo 'React packager ready.'\nexec sleep 60\n";

/// Write `body` to `<dir>/fake-packager.sh` and return its path.
pub fn write_fake_packager(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-packager.sh");
    std::fs::write(&path, body).expect("write fake packager script");
    path
}

/// Config that runs `script` through `sh` with fixed ports, rooted at `root`.
pub fn fake_packager_config(root: &Path, script: &Path) -> PackagerConfig {
    PackagerConfig::new(root)
        .with_ports(19000, 19001)
        .with_launcher("sh")
        .with_cli_path(script)
        .with_working_dir(root)
}

#[derive(Debug, Default)]
struct FakeTunnelState {
    connects: Vec<TunnelOptions>,
    disconnects: Vec<String>,
    connect_failure: Option<String>,
    disconnect_failure: Option<String>,
}

/// In-memory tunnel connector.
///
/// Clones share state, so a test can keep one clone to inspect calls made
/// through another. Successful connects return `https://<hostname>`.
#[derive(Debug, Clone, Default)]
pub struct FakeTunnelConnector {
    state: Arc<Mutex<FakeTunnelState>>,
}

impl FakeTunnelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, message: &str) {
        self.state.lock().unwrap().connect_failure = Some(message.to_string());
    }

    pub fn fail_disconnect(&self, message: &str) {
        self.state.lock().unwrap().disconnect_failure = Some(message.to_string());
    }

    /// Options of every connect attempt, in order
    pub fn connects(&self) -> Vec<TunnelOptions> {
        self.state.lock().unwrap().connects.clone()
    }

    /// URLs passed to successful disconnects, in order
    pub fn disconnects(&self) -> Vec<String> {
        self.state.lock().unwrap().disconnects.clone()
    }
}

impl TunnelConnector for FakeTunnelConnector {
    async fn connect(&self, options: &TunnelOptions) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.connects.push(options.clone());
        match &state.connect_failure {
            Some(message) => Err(Error::tunnel(message.clone())),
            None => Ok(format!("https://{}", options.hostname)),
        }
    }

    async fn disconnect(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.disconnect_failure {
            return Err(Error::tunnel(message.clone()));
        }
        state.disconnects.push(url.to_string());
        Ok(())
    }
}

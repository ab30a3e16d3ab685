//! [`TunnelConnector`] backed by a locally running ngrok agent
//!
//! The agent exposes a small HTTP API (by default on `127.0.0.1:4040`):
//! `POST /api/tunnels` starts a named tunnel and `DELETE /api/tunnels/<name>`
//! stops it. The agent's own configuration carries the account credentials.

use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use xdl_core::prelude::*;

use crate::tunnel::{TunnelConnector, TunnelOptions};

/// Default address of the agent's local API
pub const DEFAULT_AGENT_API: &str = "http://127.0.0.1:4040";

#[derive(Debug, Serialize)]
struct StartTunnelRequest<'a> {
    name: &'a str,
    proto: &'a str,
    addr: String,
    hostname: &'a str,
    inspect: bool,
}

#[derive(Debug, Deserialize)]
struct StartTunnelResponse {
    name: String,
    public_url: String,
}

/// Client for the ngrok agent API.
#[derive(Debug)]
pub struct NgrokAgent {
    client: Client,
    api: Url,
    /// public url -> tunnel name, for disconnect
    tunnels: Mutex<HashMap<String, String>>,
}

impl NgrokAgent {
    pub fn new(api: &str) -> Result<Self> {
        let api = Url::parse(api)
            .map_err(|e| Error::config(format!("invalid tunnel agent url {}: {}", api, e)))?;
        Ok(Self {
            client: Client::new(),
            api,
            tunnels: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api
            .join(path)
            .map_err(|e| Error::tunnel(format!("invalid agent endpoint {}: {}", path, e)))
    }

    /// Tunnel name recorded for `url`, else the URL's host (names are hostnames)
    fn tunnel_name(&self, url: &str) -> Result<String> {
        if let Some(name) = self.tunnels.lock().unwrap_or_else(|e| e.into_inner()).get(url) {
            return Ok(name.clone());
        }
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .ok_or_else(|| Error::tunnel(format!("unknown tunnel url: {}", url)))
    }
}

impl TunnelConnector for NgrokAgent {
    async fn connect(&self, options: &TunnelOptions) -> Result<String> {
        if options.auth_token.is_some() {
            debug!("auth token is read from the agent configuration, not sent per tunnel");
        }

        let body = StartTunnelRequest {
            name: &options.hostname,
            proto: &options.proto,
            addr: options.port.to_string(),
            hostname: &options.hostname,
            inspect: false,
        };

        let response = self
            .client
            .post(self.endpoint("/api/tunnels")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::tunnel(format!("tunnel agent unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::tunnel(format!(
                "tunnel agent rejected {}: {} {}",
                options.hostname, status, detail
            )));
        }

        let started: StartTunnelResponse = response
            .json()
            .await
            .map_err(|e| Error::tunnel(format!("malformed tunnel agent response: {}", e)))?;

        info!("Tunnel {} is up at {}", started.name, started.public_url);
        self.tunnels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(started.public_url.clone(), started.name);

        Ok(started.public_url)
    }

    async fn disconnect(&self, url: &str) -> Result<()> {
        let name = self.tunnel_name(url)?;
        let response = self
            .client
            .delete(self.endpoint(&format!("/api/tunnels/{}", name))?)
            .send()
            .await
            .map_err(|e| Error::tunnel(format!("tunnel agent unreachable: {}", e)))?;

        let status = response.status();
        // Already gone counts as disconnected.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            self.tunnels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(url);
            Ok(())
        } else {
            Err(Error::tunnel(format!(
                "tunnel agent refused to stop {}: {}",
                name, status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_agent_url_is_config_error() {
        let err = NgrokAgent::new("not a url").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_tunnel_name_falls_back_to_host() {
        let agent = NgrokAgent::new(DEFAULT_AGENT_API).unwrap();
        assert_eq!(
            agent
                .tunnel_name("https://ab-cde.jesse.app.exp.direct")
                .unwrap(),
            "ab-cde.jesse.app.exp.direct"
        );
        assert!(agent.tunnel_name("nonsense").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let body = StartTunnelRequest {
            name: "h.example",
            proto: "http",
            addr: 19000.to_string(),
            hostname: "h.example",
            inspect: false,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "name": "h.example",
                "proto": "http",
                "addr": "19000",
                "hostname": "h.example",
                "inspect": false
            })
        );
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_agent_fails() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let agent = NgrokAgent::new("http://127.0.0.1:9").unwrap();
        let options = TunnelOptions {
            hostname: "h.example".to_string(),
            auth_token: None,
            port: 19000,
            proto: "http".to_string(),
        };
        let err = agent.connect(&options).await.unwrap_err();
        assert!(matches!(err, Error::Tunnel { .. }));
    }
}

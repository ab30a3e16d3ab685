//! Public tunnel lifecycle
//!
//! [`TunnelManager`] derives a stable hostname for the project, asks a
//! [`TunnelConnector`] to expose the local server under it and remembers the
//! resulting public URL. Tunnel failures never abort the caller: a failed
//! connect leaves the URL absent, a failed disconnect keeps it.

use xdl_core::prelude::*;
use xdl_core::urls::{placeholder_username, to_http_url, tunnel_hostname, url_randomness};
use xdl_core::{
    EventBus, PackagerConfig, PackagerEvent, SessionProvider, SettingsPatch, SettingsStore,
    TunnelConfig,
};

/// Parameters for a single tunnel connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    pub hostname: String,
    pub auth_token: Option<String>,
    /// Local port the tunnel forwards to
    pub port: u16,
    pub proto: String,
}

/// Something that can open and close public tunnels
#[trait_variant::make(TunnelConnector: Send)]
pub trait LocalTunnelConnector {
    /// Open a tunnel, returning its public URL
    async fn connect(&self, options: &TunnelOptions) -> Result<String>;

    async fn disconnect(&self, url: &str) -> Result<()>;
}

/// Owns at most one open tunnel.
pub struct TunnelManager<C> {
    connector: C,
    events: EventBus,
    url: Option<String>,
}

impl<C: TunnelConnector> TunnelManager<C> {
    pub fn new(connector: C, events: EventBus) -> Self {
        Self {
            connector,
            events,
            url: None,
        }
    }

    /// Open a tunnel to the local server port of `config`.
    ///
    /// Returns the public URL, or `None` when the connection failed. Only a
    /// missing server port is reported as an error.
    pub async fn start<E>(
        &mut self,
        config: &PackagerConfig,
        env: &E,
        tunnel: &TunnelConfig,
    ) -> Result<Option<String>>
    where
        E: SettingsStore + SessionProvider + Sync,
    {
        let port = config.require_port()?;

        if self.url.is_some() {
            self.stop().await;
        }

        self.events.emit(PackagerEvent::TunnelWillStart { port });

        let url = match self.derive_hostname(config, env, &tunnel.domain).await {
            Ok(hostname) => {
                let options = TunnelOptions {
                    hostname,
                    auth_token: tunnel.auth_token.clone(),
                    port,
                    proto: "http".to_string(),
                };
                info!("Starting tunnel for {} on port {}", options.hostname, port);
                match self.connector.connect(&options).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        error!("Failed to start tunnel: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                error!("Failed to derive tunnel hostname: {}", e);
                None
            }
        };

        self.url = url.clone();
        self.events.emit(PackagerEvent::TunnelDidStart {
            port,
            url: url.clone(),
        });
        self.events.emit(PackagerEvent::TunnelReady {
            port,
            url: url.clone(),
        });

        Ok(url)
    }

    /// `<nonce>.<user>.<project>.<domain>`
    ///
    /// The nonce is persisted in the project settings on first use so the
    /// hostname survives restarts.
    async fn derive_hostname<E>(
        &self,
        config: &PackagerConfig,
        env: &E,
        domain: &str,
    ) -> Result<String>
    where
        E: SettingsStore + SessionProvider + Sync,
    {
        let settings = env.read_settings(&config.project_root).await?;
        let nonce = match settings.url_randomness {
            Some(nonce) => nonce,
            None => {
                let nonce = url_randomness();
                env.write_settings(
                    &config.project_root,
                    &SettingsPatch::url_randomness(nonce.clone()),
                )
                .await?;
                nonce
            }
        };

        let username = match env.current_user().await {
            Some(user) => user.username,
            None => env
                .read_or_create_placeholder_username()
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not persist placeholder username: {}", e);
                    placeholder_username()
                }),
        };

        Ok(tunnel_hostname(
            &nonce,
            &username,
            &config.project_short_name(),
            domain,
        ))
    }

    /// Close the tunnel, if one is open. Never fails.
    pub async fn stop(&mut self) {
        let Some(url) = self.url.clone() else {
            debug!("Tunnel not running");
            return;
        };

        self.events
            .emit(PackagerEvent::TunnelWillDisconnect { url: url.clone() });

        match self.connector.disconnect(&url).await {
            Ok(()) => {
                info!("Disconnected tunnel {}", url);
                self.url = None;
                self.events.emit(PackagerEvent::TunnelDisconnected { url });
            }
            Err(e) => {
                // The tunnel may still be up; keep the URL so a later stop can retry.
                error!("Problem disconnecting tunnel: {}", e);
                self.events.emit(PackagerEvent::TunnelDisconnectError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Public URL with `https` rewritten to `http`
    pub fn url(&self) -> Option<String> {
        self.url.as_deref().map(to_http_url)
    }

    pub fn is_connected(&self) -> bool {
        self.url.is_some()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

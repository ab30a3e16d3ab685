//! Orchestrator - owns the packager, the tunnel and the local server
//!
//! The orchestrator resolves the configuration (entry point, ports), starts the
//! three resources concurrently, persists the resulting connection info and
//! tears everything down on stop. Any one resource can be restarted without
//! disturbing the others.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use xdl_core::prelude::*;
use xdl_core::{
    validate_package_json, Environment, EventBus, ManifestSource, PackagerConfig, PackagerEvent,
    PackagerInfo, TunnelConfig, DEFAULT_ENTRY_POINT, EVENT_BUS_CAPACITY,
};
use xdl_daemon::{ProcessSupervisor, StopOutcome, TunnelConnector, TunnelManager};
use xdl_server::LocalServer;

use crate::config::DEFAULT_PORT_RANGE_START;

/// Outcome of [`Orchestrator::stop`], one entry per resource
#[derive(Debug)]
pub struct StopReport {
    pub server: Result<()>,
    pub packager: Result<StopOutcome>,
    /// Tunnel URL still registered after the disconnect attempt
    pub tunnel_url: Option<String>,
}

impl StopReport {
    /// Every resource is down
    pub fn is_clean(&self) -> bool {
        self.server.is_ok() && self.packager.is_ok() && self.tunnel_url.is_none()
    }
}

/// Entry point named by package.json `main`, else `index.js`.
pub async fn resolve_entry_point<E: ManifestSource + Sync>(env: &E, root: &Path) -> String {
    match env.read_manifest(root).await {
        Ok(Some(pkg)) => pkg
            .main
            .filter(|main| !main.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string()),
        Ok(None) => DEFAULT_ENTRY_POINT.to_string(),
        Err(e) => {
            warn!("Could not read package.json for the entry point: {}", e);
            DEFAULT_ENTRY_POINT.to_string()
        }
    }
}

/// Composes the local server, the packager and the tunnel for one project.
pub struct Orchestrator<E, C> {
    config: PackagerConfig,
    env: Arc<E>,
    events: EventBus,
    server: LocalServer<E>,
    supervisor: ProcessSupervisor,
    /// `None` when tunnelling is disabled
    tunnel: Option<TunnelManager<C>>,
    tunnel_config: TunnelConfig,
    port_range_start: u16,
    reset_cache: bool,
}

impl<E, C> Orchestrator<E, C>
where
    E: Environment,
    C: TunnelConnector + Sync + 'static,
{
    pub fn new(config: PackagerConfig, env: Arc<E>, connector: C) -> Self {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        Self {
            server: LocalServer::new(Arc::clone(&env), events.clone()),
            supervisor: ProcessSupervisor::new(events.clone()),
            tunnel: Some(TunnelManager::new(connector, events.clone())),
            config,
            env,
            events,
            tunnel_config: TunnelConfig::default(),
            port_range_start: DEFAULT_PORT_RANGE_START,
            reset_cache: false,
        }
    }

    /// Serve on LAN/localhost only
    pub fn without_tunnel(mut self) -> Self {
        self.tunnel = None;
        self
    }

    pub fn with_tunnel_config(mut self, tunnel_config: TunnelConfig) -> Self {
        self.tunnel_config = tunnel_config;
        self
    }

    pub fn with_port_range_start(mut self, port: u16) -> Self {
        self.port_range_start = port;
        self
    }

    /// Pass `--reset-cache` to the packager on the initial start
    pub fn with_reset_cache(mut self, reset_cache: bool) -> Self {
        self.reset_cache = reset_cache;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.supervisor = ProcessSupervisor::new(self.events.clone()).with_stop_timeout(timeout);
        self
    }

    pub fn with_lan_ip(mut self, lan_ip: IpAddr) -> Self {
        self.server = LocalServer::new(Arc::clone(&self.env), self.events.clone()).with_lan_ip(lan_ip);
        self
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Resolve the configuration and start all resources.
    ///
    /// Configuration problems are returned before anything starts. A fatal
    /// failure while starting (missing launcher, server port taken) stops
    /// whatever did start and is returned. Tunnel failures only leave the URL
    /// absent.
    pub async fn start(&mut self) -> Result<()> {
        self.config.require_project_root()?;

        self.spawn_validation();
        self.resolve_config().await?;
        self.config.require_port()?;
        self.config.require_packager_port()?;
        self.config.main_module_path()?;

        info!(
            "Starting {} (server port {:?}, packager port {:?})",
            self.config.project_short_name(),
            self.config.port,
            self.config.packager_port
        );

        let Self {
            config,
            env,
            server,
            supervisor,
            tunnel,
            tunnel_config,
            reset_cache,
            ..
        } = self;
        let config = &*config;
        let env: &E = env;
        let tunnel_config = &*tunnel_config;

        let (server_result, packager_result, tunnel_result) = tokio::join!(
            server.start(config),
            supervisor.start(config, *reset_cache),
            async {
                match tunnel.as_mut() {
                    Some(tunnel) => tunnel.start(config, env, tunnel_config).await,
                    None => Ok(None),
                }
            }
        );

        // A server failure is always fatal.
        let fatal = [
            server_result.err().map(|e| (true, e)),
            packager_result
                .err()
                .map(|e| (e.is_fatal() || matches!(e, Error::StopTimeout { .. }), e)),
            tunnel_result.err().map(|e| (e.is_fatal(), e)),
        ]
        .into_iter()
        .flatten()
        .fold(None, |fatal: Option<Error>, (is_fatal, e)| {
            if fatal.is_none() && is_fatal {
                Some(e)
            } else {
                error!("Failed to start resource: {}", e);
                fatal
            }
        });

        if let Some(e) = fatal {
            error!("Startup failed: {}", e);
            let report = self.stop().await;
            debug!("Rolled back after failed start: {:?}", report);
            return Err(e);
        }

        self.persist_packager_info().await;
        Ok(())
    }

    /// Stop all resources concurrently. Never fails; see the report.
    pub async fn stop(&mut self) -> StopReport {
        let Self {
            server,
            supervisor,
            tunnel,
            ..
        } = self;

        let (server, packager, tunnel_url) = tokio::join!(server.stop(), supervisor.stop(), async {
            match tunnel.as_mut() {
                Some(tunnel) => {
                    tunnel.stop().await;
                    tunnel.url()
                }
                None => None,
            }
        });

        if let Err(e) = &server {
            error!("Failed to stop local server: {}", e);
        }
        if let Err(e) = &packager {
            error!("Failed to stop packager: {}", e);
        }

        StopReport {
            server,
            packager,
            tunnel_url,
        }
    }

    /// Stop the packager (if running) and start a fresh one.
    pub async fn restart_packager(&mut self, reset_cache: bool) -> Result<()> {
        self.supervisor.start(&self.config, reset_cache).await
    }

    /// Reconnect the tunnel and record its new URL.
    pub async fn restart_tunnel(&mut self) -> Result<Option<String>> {
        let Some(tunnel) = self.tunnel.as_mut() else {
            debug!("Tunnel disabled, nothing to restart");
            return Ok(None);
        };
        let url = tunnel
            .start(&self.config, &*self.env, &self.tunnel_config)
            .await?;
        self.persist_packager_info().await;
        Ok(url)
    }

    /// Close the local server and listen again.
    pub async fn restart_server(&mut self) -> Result<SocketAddr> {
        self.server.start(&self.config).await
    }

    // ─────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────

    fn spawn_validation(&self) {
        let env = Arc::clone(&self.env);
        let root = self.config.project_root.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            validate_package_json(&*env, &root, &events).await;
        });
    }

    /// Fill in the entry point and any unassigned ports.
    async fn resolve_config(&mut self) -> Result<()> {
        if self.config.entry_point.is_none() {
            let entry_point = resolve_entry_point(&*self.env, &self.config.project_root).await;
            debug!("Resolved entry point: {}", entry_point);
            self.config.entry_point = Some(entry_point);
        }

        if self.config.port.is_none() || self.config.packager_port.is_none() {
            let assigned = [self.config.port, self.config.packager_port];
            let mut free = self
                .env
                .allocate_free_ports(2, self.port_range_start)
                .await?
                .into_iter()
                .filter(|port| !assigned.contains(&Some(*port)));

            if self.config.port.is_none() {
                self.config.port = free.next();
            }
            if self.config.packager_port.is_none() {
                self.config.packager_port = free.next();
            }
        }

        Ok(())
    }

    async fn persist_packager_info(&self) {
        let info = PackagerInfo {
            port: self.config.port,
            packager_port: self.config.packager_port,
            ngrok: self.tunnel_url(),
        };
        if let Err(e) = self
            .env
            .write_packager_info(&self.config.project_root, &info)
            .await
        {
            error!("Failed to record packager info: {}", e);
        }
    }

    // ─────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────

    /// Public tunnel URL (as `http`), if connected
    pub fn tunnel_url(&self) -> Option<String> {
        self.tunnel.as_ref().and_then(TunnelManager::url)
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PackagerEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn packager_pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    pub fn is_packager_running(&self) -> bool {
        self.supervisor.is_running()
    }
}

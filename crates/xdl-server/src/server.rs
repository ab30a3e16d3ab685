//! Local HTTP server lifecycle
//!
//! [`LocalServer`] binds the front door on the configured port, routes manifest
//! requests to [`manifest_handler`] and everything else to the packager proxy.
//! Restarting always closes the previous listener first.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use xdl_core::prelude::*;
use xdl_core::urls::lan_address;
use xdl_core::{Environment, EventBus, PackagerConfig};

use crate::cache::ManifestCache;
use crate::manifest::manifest_handler;
use crate::proxy::proxy_handler;

/// Everything a request handler needs, fixed for the life of one listener
pub struct ServerContext<E> {
    pub env: Arc<E>,
    pub events: EventBus,
    pub cache: Arc<ManifestCache>,
    pub client: reqwest::Client,
    pub project_root: PathBuf,
    pub project_short_name: String,
    pub main_module_path: String,
    pub packager_port: u16,
    pub lan_ip: IpAddr,
}

/// Shared handler state
pub struct ServerState<E>(Arc<ServerContext<E>>);

impl<E> ServerState<E> {
    pub fn new(context: ServerContext<E>) -> Self {
        Self(Arc::new(context))
    }
}

// Manual impl: `E` itself need not be `Clone`.
impl<E> Clone for ServerState<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E> Deref for ServerState<E> {
    type Target = ServerContext<E>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Build the router for one listener.
pub fn router<E: Environment>(state: ServerState<E>) -> Router {
    Router::new()
        .route("/", get(manifest_handler::<E>))
        .route("/manifest", get(manifest_handler::<E>))
        .route("/index.exp", get(manifest_handler::<E>))
        .fallback(proxy_handler::<E>)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// The local HTTP front door.
///
/// The signed manifest cache outlives individual listeners, so a server
/// restart does not force a re-sign.
pub struct LocalServer<E> {
    env: Arc<E>,
    events: EventBus,
    cache: Arc<ManifestCache>,
    client: reqwest::Client,
    lan_ip: Option<IpAddr>,
    running: Option<RunningServer>,
}

impl<E: Environment> LocalServer<E> {
    pub fn new(env: Arc<E>, events: EventBus) -> Self {
        Self {
            env,
            events,
            cache: Arc::new(ManifestCache::new()),
            client: reqwest::Client::new(),
            lan_ip: None,
            running: None,
        }
    }

    /// Pin the LAN address used in manifest URLs instead of detecting it
    pub fn with_lan_ip(mut self, lan_ip: IpAddr) -> Self {
        self.lan_ip = Some(lan_ip);
        self
    }

    /// Start listening on the configured server port, replacing any previous
    /// listener. Port `0` picks an ephemeral port.
    pub async fn start(&mut self, config: &PackagerConfig) -> Result<SocketAddr> {
        let port = config.require_port()?;
        let packager_port = config.require_packager_port()?;
        let main_module_path = config.main_module_path()?;

        self.stop().await?;

        let state = ServerState::new(ServerContext {
            env: Arc::clone(&self.env),
            events: self.events.clone(),
            cache: Arc::clone(&self.cache),
            client: self.client.clone(),
            project_root: config.project_root.clone(),
            project_short_name: config.project_short_name(),
            main_module_path,
            packager_port,
            lan_ip: self.lan_ip.unwrap_or_else(lan_address),
        });

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::server(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Local server listening at http://{}", addr);
        self.running = Some(RunningServer {
            addr,
            shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// Close the listener and wait until it has fully shut down. No-op when
    /// not listening.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        debug!("Closing local server on {}", running.addr);
        // The server task may already have ended on its own.
        let _ = running.shutdown_tx.send(());

        match running.task.await {
            Ok(Ok(())) => {
                info!("Local server on {} closed", running.addr);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::server(format!("server error: {}", e))),
            Err(e) => Err(Error::server(format!("server task failed: {}", e))),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    pub fn is_listening(&self) -> bool {
        self.running.is_some()
    }

    pub fn cache(&self) -> &Arc<ManifestCache> {
        &self.cache
    }
}

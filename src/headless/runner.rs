//! Headless mode runner - forwards orchestrator events to stdout

use std::io::Write;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use xdl_app::{spawn_signal_handler, Orchestrator, ShutdownState, StopReport};
use xdl_core::prelude::*;
use xdl_core::{Environment, PackagerEvent};
use xdl_daemon::TunnelConnector;

use super::HeadlessEvent;

/// Start everything, stream events to stdout until SIGINT/SIGTERM, then stop
pub async fn run_headless<E, C>(mut orchestrator: Orchestrator<E, C>) -> Result<()>
where
    E: Environment,
    C: TunnelConnector + Sync + 'static,
{
    info!("═══════════════════════════════════════════════════════");
    info!("xdl starting in HEADLESS mode");
    info!("Project: {}", orchestrator.config().project_root.display());
    info!("═══════════════════════════════════════════════════════");

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownState::Running);
    let _signals = spawn_signal_handler(shutdown_tx);

    let mut stdout = std::io::stdout();
    let report = run_until_shutdown(&mut orchestrator, shutdown_rx, &mut stdout).await?;

    info!("xdl headless mode exiting");
    if report.is_clean() {
        Ok(())
    } else {
        Err(Error::process("one or more resources failed to stop"))
    }
}

/// Drive one orchestrator session, writing NDJSON to `out`.
///
/// Returns once shutdown is requested (or its sender is dropped) and every
/// resource has been stopped. A fatal startup error is written to `out` and
/// returned. A forced shutdown during the stop abandons it and returns an
/// error; dropping the orchestrator then kills the packager.
pub async fn run_until_shutdown<E, C, W>(
    orchestrator: &mut Orchestrator<E, C>,
    mut shutdown: watch::Receiver<ShutdownState>,
    out: &mut W,
) -> Result<StopReport>
where
    E: Environment,
    C: TunnelConnector + Sync + 'static,
    W: Write,
{
    let mut events = orchestrator.subscribe();

    if let Err(e) = orchestrator.start().await {
        error!("Startup failed: {}", e);
        drain(&mut events, out);
        HeadlessEvent::error(e.to_string(), true).emit_to(out);
        return Err(e);
    }

    drain(&mut events, out);
    HeadlessEvent::started(
        orchestrator
            .local_addr()
            .map(|addr| format!("http://{}", addr)),
        orchestrator.config().packager_port,
        orchestrator.tunnel_url(),
    )
    .emit_to(out);

    if !shutdown.borrow().is_requested() {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => forward(event, out),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Headless output lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event bus closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || shutdown.borrow().is_requested() {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    let report = tokio::select! {
        report = orchestrator.stop() => report,
        Ok(_) = shutdown.wait_for(|state| *state == ShutdownState::Forced) => {
            warn!("Forced shutdown, abandoning graceful stop");
            drain(&mut events, out);
            HeadlessEvent::error("Shutdown forced before all resources stopped".to_string(), true)
                .emit_to(out);
            return Err(Error::process("shutdown forced"));
        }
    };
    drain(&mut events, out);

    if let Err(e) = &report.server {
        HeadlessEvent::error(format!("Server: {}", e), false).emit_to(out);
    }
    if let Err(e) = &report.packager {
        HeadlessEvent::error(format!("Packager: {}", e), false).emit_to(out);
    }
    HeadlessEvent::stopped(report.is_clean()).emit_to(out);

    Ok(report)
}

fn forward<W: Write>(event: PackagerEvent, out: &mut W) {
    HeadlessEvent::packager(event).emit_to(out);
}

/// Write every event that is already queued
fn drain<W: Write>(events: &mut broadcast::Receiver<PackagerEvent>, out: &mut W) {
    loop {
        match events.try_recv() {
            Ok(event) => forward(event, out),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Headless output lagged, skipped {} events", skipped);
            }
            Err(_) => break,
        }
    }
}

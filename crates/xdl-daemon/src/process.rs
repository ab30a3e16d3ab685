//! Packager process management
//!
//! [`PackagerProcess`] wraps one spawned packager; [`ProcessSupervisor`] owns at
//! most one of them and implements the restart/stop policy.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

use xdl_core::prelude::*;
use xdl_core::{EventBus, PackagerConfig, PackagerEvent};

/// How long `stop()` waits for the packager to exit after SIGTERM
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Stdout marker the packager prints once it accepts requests.
///
/// This is a best-effort text match, not a protocol.
static READY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"React packager ready\.").expect("Invalid ready marker regex"));

/// Lifecycle state published by the wait task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited { code: Option<i32> },
}

impl ProcessState {
    pub fn is_exited(&self) -> bool {
        matches!(self, ProcessState::Exited { .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessState::Running => None,
            ProcessState::Exited { code } => *code,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing to stop: no process, or it already exited or was signalled
    AlreadyStopped,
    /// The process exited after the termination signal
    Exited { code: Option<i32> },
}

/// A spawned packager process.
///
/// The `Child` is moved into a dedicated `wait_for_exit` task which publishes the
/// exit through a `watch` channel and emits `PackagerStopped` exactly once.
/// The handle keeps a kill channel for forced teardown on drop.
pub struct PackagerProcess {
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set once a termination signal has been delivered. Never reset.
    killed: AtomicBool,
    state_rx: watch::Receiver<ProcessState>,
}

impl PackagerProcess {
    /// Spawn the packager for `config`.
    ///
    /// Fails fast on configuration errors (unset packager port, missing project
    /// root) and on a launcher that cannot be found.
    pub fn spawn(config: &PackagerConfig, reset_cache: bool, events: EventBus) -> Result<Self> {
        let args = packager_args(config, reset_cache)?;
        let launcher = resolve_launcher(&config.launcher)?;

        info!(
            "Spawning packager: {} {}",
            launcher.display(),
            args.join(" ")
        );

        let mut child = Command::new(&launcher)
            .args(&args)
            .current_dir(&config.working_dir)
            .env_remove("NODE_PATH")
            .env("ELECTRON_RUN_AS_NODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // the child must never outlive us
            .spawn()
            .map_err(|e| Error::ProcessSpawn {
                reason: format!("{}: {}", launcher.display(), e),
            })?;

        let pid = child.id();
        info!("Packager process started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("packager stdout was not captured"))?;
        tokio::spawn(Self::stdout_reader(stdout, pid, events.clone()));

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("packager stderr was not captured"))?;
        tokio::spawn(Self::stderr_reader(stderr, events.clone()));

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(child, kill_rx, state_tx, events));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            killed: AtomicBool::new(false),
            state_rx,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `PackagerStopped`.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        state_tx: watch::Sender<ProcessState>,
        events: EventBus,
    ) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("packager process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for packager process: {}", e);
                        None
                    }
                }
            }
            Ok(()) = kill_rx => {
                warn!("Kill requested, force-killing packager process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill packager process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Publish the state before the event so observers of the event always
        // see `has_exited() == true`.
        let _ = state_tx.send(ProcessState::Exited { code });
        events.emit(PackagerEvent::PackagerStopped { code });
    }

    /// Forward stdout lines and watch for the ready marker.
    async fn stdout_reader(
        stdout: tokio::process::ChildStdout,
        pid: Option<u32>,
        events: EventBus,
    ) {
        read_lines(stdout, "stdout", |line| {
            let ready = READY_MARKER.is_match(&line);
            events.emit(PackagerEvent::Stdout { line });
            if ready {
                info!("Packager reported ready");
                events.emit(PackagerEvent::PackagerReady { pid });
            }
        })
        .await;
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr, events: EventBus) {
        read_lines(stderr, "stderr", |line| {
            events.emit(PackagerEvent::Stderr { line });
        })
        .await;
    }

    /// Send SIGTERM and wait up to `timeout` for the process to exit.
    ///
    /// On timeout the process is left running and is not marked exited.
    pub async fn stop(&mut self, timeout: Duration, events: &EventBus) -> Result<StopOutcome> {
        if self.has_exited() || self.is_killed() {
            info!("Packager already stopped.");
            return Ok(StopOutcome::AlreadyStopped);
        }

        info!("Stopping packager...");
        let mut state_rx = self.state_rx.clone();
        events.emit(PackagerEvent::PackagerWillStop);

        if let Err(e) = self.terminate() {
            if self.has_exited() {
                return Ok(StopOutcome::Exited {
                    code: self.exit_code(),
                });
            }
            return Err(e);
        }

        let exited = tokio::time::timeout(timeout, async move {
            state_rx
                .wait_for(ProcessState::is_exited)
                .await
                .map(|state| *state)
        })
        .await;

        match exited {
            Ok(Ok(state)) => Ok(StopOutcome::Exited { code: state.code() }),
            Ok(Err(_)) => Err(Error::process("packager exit watcher went away")),
            Err(_) => {
                error!("Stopping packager timed out!");
                Err(Error::stop_timeout(timeout))
            }
        }
    }

    /// Deliver the graceful termination signal.
    fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            let pid = self
                .pid
                .ok_or_else(|| Error::process("packager has no pid"))?;
            // SAFETY: plain kill(2) on a child we spawned; the wait task has not
            // reaped it yet because `has_exited()` was false.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(Error::process(format!(
                    "failed to signal packager: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }

        #[cfg(not(unix))]
        {
            // No SIGTERM equivalent; ask the wait task to terminate the child.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }

        self.killed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.state_rx.borrow().is_exited()
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// True once a termination signal has been delivered
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Exit code, once exited (`None` while running or when killed by a signal)
    pub fn exit_code(&self) -> Option<i32> {
        self.state_rx.borrow().code()
    }

    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for PackagerProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("PackagerProcess dropped while process may still be running");
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        debug!("PackagerProcess dropped");
    }
}

/// Call `on_line` for every line of `stream` until EOF.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream, so
/// the pipe keeps draining whatever the packager prints.
async fn read_lines<R>(stream: R, name: &str, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                trace!("{}: {}", name, line);
                on_line(line);
            }
            Err(e) => {
                debug!("{} read error: {}", name, e);
                break;
            }
        }
    }

    debug!("{} reader finished", name);
}

/// Command-line arguments for the packager CLI script.
pub fn packager_args(config: &PackagerConfig, reset_cache: bool) -> Result<Vec<String>> {
    let packager_port = config.require_packager_port()?;
    let root = config.require_project_root()?.to_string_lossy().into_owned();

    let mut args = vec![
        config.cli_path.to_string_lossy().into_owned(),
        "start".to_string(),
        "--port".to_string(),
        packager_port.to_string(),
        "--projectRoots".to_string(),
        root.clone(),
        "--assetRoots".to_string(),
        root,
    ];

    if reset_cache {
        args.push("--reset-cache".to_string());
    }

    Ok(args)
}

/// Bare launcher names are looked up on `PATH`; paths must exist.
fn resolve_launcher(launcher: &Path) -> Result<PathBuf> {
    let not_found = || Error::LauncherNotFound {
        launcher: launcher.display().to_string(),
    };

    if launcher.components().count() > 1 || launcher.is_absolute() {
        return if launcher.exists() {
            Ok(launcher.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    which::which(launcher).map_err(|_| not_found())
}

// ─────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────

/// Owns at most one live packager process.
pub struct ProcessSupervisor {
    events: EventBus,
    process: Option<PackagerProcess>,
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            process: None,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    /// Override the graceful-stop wait (tests use a short one)
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start the packager, stopping any live instance first.
    ///
    /// A stop timeout aborts the restart and is returned to the caller.
    pub async fn start(&mut self, config: &PackagerConfig, reset_cache: bool) -> Result<()> {
        config.require_packager_port()?;
        config.require_project_root()?;

        self.stop().await?;
        // Dropping the previous handle force-kills anything still attached to it.
        self.process = None;

        self.process = Some(PackagerProcess::spawn(
            config,
            reset_cache,
            self.events.clone(),
        )?);
        Ok(())
    }

    /// Stop the live packager, if any. Idempotent.
    pub async fn stop(&mut self) -> Result<StopOutcome> {
        match self.process.as_mut() {
            Some(process) => process.stop(self.stop_timeout, &self.events).await,
            None => {
                info!("Packager already stopped.");
                Ok(StopOutcome::AlreadyStopped)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(PackagerProcess::is_running)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(PackagerProcess::id)
    }

    pub fn process(&self) -> Option<&PackagerProcess> {
        self.process.as_ref()
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

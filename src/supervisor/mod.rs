//! Supervisor for the single backend process serving tool calls.
//!
//! The PID file in the state directory is the only durable record of liveness, so a
//! restarted server can find and stop a backend launched by a previous run.

pub mod os;
pub mod state;

pub use state::{BackendConfig, BackendConfigPatch, StateFiles};

use crate::audit::{AuditEvent, AuditSink};
use crate::errors::SupervisorError;
use serde::Serialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

/// How long to wait for a process to disappear after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Supervisor settings taken from configuration
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Program and arguments; `{host}`, `{port}` and `{log_level}` are substituted
    pub command: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
    pub state_dir: PathBuf,
    /// Seed for `backend.json` when it does not exist yet
    pub defaults: BackendConfig,
    /// Path probed and forwarded to on the backend
    pub backend_path: String,
    pub start_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// A PID is recorded but the process is gone
    Unknown,
}

/// A started backend
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub log_path: PathBuf,
    pub config: BackendConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub running: bool,
    pub pid: Option<u32>,
    pub config: BackendConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub pid: u32,
    /// SIGKILL was needed
    pub forced: bool,
}

/// Starts, stops and health-checks the backend process.
pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    files: StateFiles,
    client: reqwest::Client,
    audit: Arc<dyn AuditSink>,
    /// Serializes start, stop, restart and config updates
    mutation: Mutex<()>,
    /// Transitional state visible to `status` while a mutation runs
    phase: std::sync::Mutex<Option<ProcessState>>,
    config: std::sync::Mutex<Option<BackendConfig>>,
    cancel: CancellationToken,
}

impl ProcessSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        client: reqwest::Client,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            files: StateFiles::new(settings.state_dir.clone()),
            settings,
            client,
            audit,
            mutation: Mutex::new(()),
            phase: std::sync::Mutex::new(None),
            config: std::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort readiness waits and stop reaping children when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn files(&self) -> &StateFiles {
        &self.files
    }

    /// Launch the backend and wait until it answers a probe.
    pub async fn start(&self) -> Result<ProcessHandle, SupervisorError> {
        let _guard = self.mutation.lock().await;
        self.start_locked().await
    }

    /// Terminate the backend: SIGTERM, then SIGKILL after the grace period.
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let _guard = self.mutation.lock().await;
        self.stop_locked().await
    }

    /// Stop (tolerating a backend that is not running) and start again.
    pub async fn restart(&self) -> Result<ProcessHandle, SupervisorError> {
        let _guard = self.mutation.lock().await;
        match self.stop_locked().await {
            Ok(_) | Err(SupervisorError::NotRunning) => {}
            Err(err) => return Err(err),
        }
        self.start_locked().await
    }

    /// Start the backend when the persisted configuration asks for it.
    ///
    /// A backend that is already running counts as started.
    pub async fn auto_start(&self) -> Result<Option<ProcessHandle>, SupervisorError> {
        let config = self.config().await?;
        if !config.auto_start {
            return Ok(None);
        }
        if self.settings.command.is_none() {
            tracing::warn!("backend auto start requested but no command is configured");
            return Ok(None);
        }
        match self.start().await {
            Ok(handle) => Ok(Some(handle)),
            Err(SupervisorError::AlreadyRunning(pid)) => {
                tracing::info!(pid, "backend already running, auto start skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Current state; liveness is re-checked on every call.
    pub async fn status(&self) -> Result<ProcessStatus, SupervisorError> {
        let config = self.config().await?;
        let pid = self.files.read_pid().await?;
        let alive = match pid {
            Some(pid) => os::is_alive(pid).await,
            None => false,
        };

        let state = match (self.current_phase(), pid) {
            (Some(phase), _) => phase,
            (None, None) => ProcessState::Stopped,
            (None, Some(_)) if alive => ProcessState::Running,
            (None, Some(_)) => ProcessState::Unknown,
        };

        Ok(ProcessStatus {
            state,
            running: alive,
            pid,
            config,
        })
    }

    /// True when the backend endpoint returns any HTTP response within the probe timeout.
    pub async fn probe(&self, config: &BackendConfig) -> bool {
        let url = self.backend_url(config);
        match self
            .client
            .get(&url)
            .timeout(self.settings.probe_timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(%url, error = %err, "backend probe failed");
                false
            }
        }
    }

    /// `http://{host}:{port}{path}` of the backend endpoint
    pub fn backend_url(&self, config: &BackendConfig) -> String {
        let host = if config.host.contains(':') && !config.host.starts_with('[') {
            format!("[{}]", config.host)
        } else {
            config.host.clone()
        };
        format!(
            "http://{}:{}{}",
            host, config.port, self.settings.backend_path
        )
    }

    /// Persisted backend configuration, seeded from the defaults on first use.
    pub async fn config(&self) -> Result<BackendConfig, SupervisorError> {
        if let Some(config) = self.cached_config() {
            return Ok(config);
        }

        let config = match self.files.read_config().await? {
            Some(config) => config,
            None => {
                let config = self.settings.defaults.clone();
                self.files.write_config(&config).await?;
                config
            }
        };
        self.cache_config(&config);
        Ok(config)
    }

    /// Persist a configuration change. A running backend keeps its old settings until restarted.
    pub async fn update_config(
        &self,
        patch: BackendConfigPatch,
    ) -> Result<BackendConfig, SupervisorError> {
        let _guard = self.mutation.lock().await;
        let updated = self.config().await?.apply(patch)?;
        self.files.write_config(&updated).await?;
        self.cache_config(&updated);
        tracing::info!(?updated, "backend configuration updated");
        Ok(updated)
    }

    pub async fn log_tail(&self, lines: usize) -> Result<String, SupervisorError> {
        self.files.log_tail(lines).await
    }

    async fn start_locked(&self) -> Result<ProcessHandle, SupervisorError> {
        if let Some(pid) = self.files.read_pid().await? {
            if os::is_alive(pid).await {
                return Err(SupervisorError::AlreadyRunning(pid));
            }
            tracing::warn!(pid, "clearing stale backend pid");
            self.files.clear_pid().await?;
        }

        let command = self
            .settings
            .command
            .as_ref()
            .ok_or(SupervisorError::CommandNotConfigured)?;
        let (program, args) = command
            .split_first()
            .ok_or(SupervisorError::CommandNotConfigured)?;

        let config = self.config().await?;
        let _phase = PhaseGuard::enter(&self.phase, ProcessState::Starting);

        self.files.ensure_dir().await?;
        let stdout = self.files.open_log()?;
        let stderr = stdout.try_clone().map_err(|e| {
            SupervisorError::StateFile(self.files.log_path().display().to_string(), e.to_string())
        })?;

        let mut cmd = Command::new(substitute(program, &config));
        cmd.args(args.iter().map(|arg| substitute(arg, &config)))
            .env("BACKEND_HOST", &config.host)
            .env("BACKEND_PORT", config.port.to_string())
            .env("BACKEND_LOG_LEVEL", &config.log_level)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.settings.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("{}: {}", program, e)))?;
        let pid = child.id().ok_or_else(|| {
            SupervisorError::SpawnFailed("process exited before reporting a pid".to_string())
        })?;

        if let Err(err) = self.files.write_pid(pid).await {
            let _ = child.start_kill();
            return Err(err);
        }

        tracing::info!(pid, program = %program, "backend spawned");
        let exited = self.spawn_reaper(pid, child);
        self.wait_until_ready(pid, config, exited).await
    }

    async fn wait_until_ready(
        &self,
        pid: u32,
        config: BackendConfig,
        mut exited: oneshot::Receiver<ExitStatus>,
    ) -> Result<ProcessHandle, SupervisorError> {
        let started = Instant::now();
        let deadline = started + self.settings.start_timeout;

        loop {
            if self.probe(&config).await {
                tracing::info!(pid, elapsed_ms = started.elapsed().as_millis() as u64, "backend ready");
                self.audit.record(AuditEvent::ProcessStarted { pid });
                return Ok(ProcessHandle {
                    pid,
                    host: config.host.clone(),
                    port: config.port,
                    log_path: self.files.log_path(),
                    config,
                });
            }

            if Instant::now() >= deadline {
                let log_tail = self.files.log_tail(20).await.unwrap_or_default();
                tracing::warn!(pid, "backend not ready before start timeout");
                return Err(SupervisorError::StartTimeout {
                    pid,
                    waited_ms: started.elapsed().as_millis(),
                    log_tail,
                });
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(SupervisorError::Cancelled),
                status = &mut exited => {
                    self.files.clear_pid().await?;
                    let log_tail = self.files.log_tail(20).await.unwrap_or_default();
                    tracing::warn!(pid, status = ?status.ok(), "backend exited during startup");
                    return Err(SupervisorError::ExitedDuringStart { pid, log_tail });
                }
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    async fn stop_locked(&self) -> Result<StopOutcome, SupervisorError> {
        let Some(pid) = self.files.read_pid().await? else {
            return Err(SupervisorError::NotRunning);
        };
        if !os::is_alive(pid).await {
            tracing::info!(pid, "clearing pid of a backend that is no longer running");
            self.files.clear_pid().await?;
            return Err(SupervisorError::NotRunning);
        }

        let _phase = PhaseGuard::enter(&self.phase, ProcessState::Stopping);

        os::send_signal(pid, os::Signal::Term).await?;
        let forced = if self.wait_for_exit(pid, self.settings.stop_grace).await {
            false
        } else {
            tracing::warn!(pid, "backend ignored SIGTERM, sending SIGKILL");
            os::send_signal(pid, os::Signal::Kill).await?;
            if !self.wait_for_exit(pid, KILL_WAIT).await {
                return Err(SupervisorError::SignalFailed(
                    pid,
                    "process survived SIGKILL".to_string(),
                ));
            }
            true
        };

        self.files.clear_pid().await?;
        tracing::info!(pid, forced, "backend stopped");
        self.audit.record(AuditEvent::ProcessStopped { pid, forced });
        Ok(StopOutcome { pid, forced })
    }

    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let interval = self.settings.poll_interval.min(Duration::from_millis(100));
        loop {
            if !os::is_alive(pid).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Await the child so it never lingers as a zombie; report its exit to the start wait.
    fn spawn_reaper(&self, pid: u32, mut child: Child) -> oneshot::Receiver<ExitStatus> {
        let (tx, rx) = oneshot::channel();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => {
                        tracing::info!(pid, %status, "backend exited");
                        let _ = tx.send(status);
                    }
                    Err(err) => tracing::error!(pid, error = %err, "waiting for backend failed"),
                },
                () = cancel.cancelled() => {}
            }
        });
        rx
    }

    fn current_phase(&self) -> Option<ProcessState> {
        self.phase.lock().ok().and_then(|phase| *phase)
    }

    fn cached_config(&self) -> Option<BackendConfig> {
        self.config.lock().ok().and_then(|config| config.clone())
    }

    fn cache_config(&self, config: &BackendConfig) {
        if let Ok(mut cached) = self.config.lock() {
            *cached = Some(config.clone());
        }
    }
}

/// Marks a transitional state for the lifetime of the guard.
struct PhaseGuard<'a>(&'a std::sync::Mutex<Option<ProcessState>>);

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a std::sync::Mutex<Option<ProcessState>>, state: ProcessState) -> Self {
        if let Ok(mut current) = phase.lock() {
            *current = Some(state);
        }
        Self(phase)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.0.lock() {
            *current = None;
        }
    }
}

fn substitute(template: &str, config: &BackendConfig) -> String {
    template
        .replace("{host}", &config.host)
        .replace("{port}", &config.port.to_string())
        .replace("{log_level}", &config.log_level)
}

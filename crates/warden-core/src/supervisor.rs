//! Client-side readiness: probe the service, start it when nothing answers,
//! then poll until it does or the deadline passes.

use crate::ipc_client::IpcClient;
use crate::settings::WardenSettings;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Unknown,
    Probing,
    Starting,
    Ready,
    Failed,
}

/// Every variant is fatal for the client.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service executable not found: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service did not become ready within {0:?}")]
    DeadlineExceeded(Duration),
}

#[async_trait::async_trait]
pub trait LivenessProbe {
    /// True when the service answered with the expected token within `timeout`.
    async fn probe(&self, timeout: Duration) -> bool;
}

pub trait ServiceLauncher {
    fn launch(&self) -> Result<(), SupervisorError>;
}

/// Pings over IPC and compares the token for exact equality.
pub struct TokenProbe {
    client: IpcClient,
    expected: String,
}

impl TokenProbe {
    pub fn new(client: IpcClient, expected: impl Into<String>) -> Self {
        Self {
            client,
            expected: expected.into(),
        }
    }
}

#[async_trait::async_trait]
impl LivenessProbe for TokenProbe {
    async fn probe(&self, timeout: Duration) -> bool {
        match self.client.with_timeout(timeout).ping().await {
            Ok(token) if token == self.expected => true,
            Ok(token) => {
                warn!(%token, "unexpected liveness token");
                false
            }
            Err(e) => {
                debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }
}

/// Starts the background executable detached, inheriting standard I/O.
pub struct ProcessLauncher {
    executable: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl ServiceLauncher for ProcessLauncher {
    fn launch(&self) -> Result<(), SupervisorError> {
        if !self.executable.is_file() {
            return Err(SupervisorError::MissingExecutable(self.executable.clone()));
        }
        let child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                path: self.executable.clone(),
                source,
            })?;
        info!(pid = child.id(), exe = %self.executable.display(), "service started");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    pub deadline: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl From<&WardenSettings> for SupervisorTiming {
    fn from(settings: &WardenSettings) -> Self {
        Self {
            deadline: settings.startup_timeout(),
            poll_interval: settings.poll_interval(),
            probe_timeout: settings.probe_timeout(),
        }
    }
}

pub struct Supervisor {
    probe: Box<dyn LivenessProbe + Send + Sync>,
    launcher: Box<dyn ServiceLauncher + Send + Sync>,
    timing: SupervisorTiming,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(
        probe: Box<dyn LivenessProbe + Send + Sync>,
        launcher: Box<dyn ServiceLauncher + Send + Sync>,
        timing: SupervisorTiming,
    ) -> Self {
        Self {
            probe,
            launcher,
            timing,
            state: SupervisorState::Unknown,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Returns once the service answers. `Ready` is sticky: later calls return
    /// immediately without probing.
    pub async fn ensure_ready(&mut self) -> Result<(), SupervisorError> {
        if self.state == SupervisorState::Ready {
            return Ok(());
        }

        self.state = SupervisorState::Probing;
        if self.probe.probe(self.timing.probe_timeout).await {
            debug!("service already running");
            self.state = SupervisorState::Ready;
            return Ok(());
        }

        self.state = SupervisorState::Starting;
        if let Err(e) = self.launcher.launch() {
            self.state = SupervisorState::Failed;
            return Err(e);
        }

        let deadline = Instant::now() + self.timing.deadline;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let budget = self.timing.probe_timeout.min(deadline - now);
            if self.probe.probe(budget).await {
                info!("service is ready");
                self.state = SupervisorState::Ready;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.timing.poll_interval.min(deadline - now)).await;
        }

        self.state = SupervisorState::Failed;
        Err(SupervisorError::DeadlineExceeded(self.timing.deadline))
    }
}
